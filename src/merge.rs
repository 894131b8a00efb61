use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::segment::{DocId, IndexError, SegmentReader, SegmentWriter, TermFrequency, TermId};

/// One decoded postings list: doc ids ascending, tfs aligned with them.
pub type PostingsList = (Vec<DocId>, Vec<TermFrequency>);

/// Merges two ascending postings lists into one ascending list. When both
/// sides carry the same doc id its term frequencies are summed, which is
/// what makes re-merging a split collection equal to indexing it whole.
pub fn merge_postings(a: &PostingsList, b: &PostingsList) -> PostingsList {
    let (a_docs, a_tfs) = a;
    let (b_docs, b_tfs) = b;
    let mut doc_ids = Vec::with_capacity(a_docs.len() + b_docs.len());
    let mut tfs = Vec::with_capacity(a_docs.len() + b_docs.len());

    let mut i = 0;
    let mut j = 0;
    while i < a_docs.len() && j < b_docs.len() {
        match a_docs[i].cmp(&b_docs[j]) {
            Ordering::Less => {
                doc_ids.push(a_docs[i]);
                tfs.push(a_tfs[i]);
                i += 1;
            }
            Ordering::Greater => {
                doc_ids.push(b_docs[j]);
                tfs.push(b_tfs[j]);
                j += 1;
            }
            Ordering::Equal => {
                doc_ids.push(a_docs[i]);
                tfs.push(a_tfs[i] + b_tfs[j]);
                i += 1;
                j += 1;
            }
        }
    }
    doc_ids.extend_from_slice(&a_docs[i..]);
    tfs.extend_from_slice(&a_tfs[i..]);
    doc_ids.extend_from_slice(&b_docs[j..]);
    tfs.extend_from_slice(&b_tfs[j..]);

    (doc_ids, tfs)
}

/// Head of one source iterator, ordered for a min-heap by
/// `(term_id, source)` so the merge is stable across runs.
struct HeapEntry {
    term_id: TermId,
    source: usize,
    postings: PostingsList,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.term_id == other.term_id && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, reverse for ascending term ids
        (other.term_id, other.source).cmp(&(self.term_id, self.source))
    }
}

/// N-way merges intermediate segments into `out`.
///
/// Every source iterator yields its terms in ascending term-id order, so a
/// heap of iterator heads visits each distinct term id once, folding all
/// postings lists that share it with [`merge_postings`] before appending.
/// The output writer re-accumulates doc lengths from the tfs it is handed,
/// which reconstructs the merged doc-length table without a second pass.
pub fn merge_segments(
    inputs: &[SegmentReader],
    out: &mut SegmentWriter,
) -> Result<(), IndexError> {
    let mut iters: Vec<_> = inputs.iter().map(|reader| reader.iter()).collect();
    let mut heap = BinaryHeap::with_capacity(iters.len());

    for (source, iter) in iters.iter_mut().enumerate() {
        if let Some(entry) = iter.next() {
            let (term_id, doc_ids, tfs) = entry?;
            heap.push(HeapEntry {
                term_id,
                source,
                postings: (doc_ids, tfs),
            });
        }
    }

    while let Some(head) = heap.pop() {
        let term_id = head.term_id;
        let mut merged = head.postings;
        if let Some(entry) = iters[head.source].next() {
            let (next_term, doc_ids, tfs) = entry?;
            heap.push(HeapEntry {
                term_id: next_term,
                source: head.source,
                postings: (doc_ids, tfs),
            });
        }

        while heap.peek().is_some_and(|next| next.term_id == term_id) {
            if let Some(same) = heap.pop() {
                merged = merge_postings(&merged, &same.postings);
                if let Some(entry) = iters[same.source].next() {
                    let (next_term, doc_ids, tfs) = entry?;
                    heap.push(HeapEntry {
                        term_id: next_term,
                        source: same.source,
                        postings: (doc_ids, tfs),
                    });
                }
            }
        }

        out.append(term_id, &merged.0, &merged.1)?;
    }

    Ok(())
}
