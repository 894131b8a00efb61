use anyhow::Context;
use indicatif::ProgressBar;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};

use crate::Message;
use crate::codec::Codec;
use crate::idmap::IdMap;
use crate::lexer;
use crate::merge::merge_segments;
use crate::segment::{DocId, SegmentReader, SegmentWriter, TermFrequency, TermId};

/// Name of the merged segment every query runs against.
pub const MAIN_INDEX: &str = "main_index";
/// File name of the persisted term id map.
pub const TERMS_DICT: &str = "terms.dict";
/// File name of the persisted doc id map.
pub const DOCS_DICT: &str = "docs.dict";

/// Blocked sort-based indexing over a collection directory.
///
/// Each immediate sub-directory of `data_dir` is one block. Blocks are
/// parsed and inverted one at a time into `intermediate_<block>` segments,
/// then merged into [`MAIN_INDEX`]. The term and doc id maps are shared
/// across all blocks so ids are globally consistent, and both are
/// persisted next to the segments.
pub struct BsbiIndexer {
    data_dir: PathBuf,
    output_dir: PathBuf,
    codec: Codec,
    term_ids: IdMap,
    doc_ids: IdMap,
    sender: Arc<Mutex<mpsc::Sender<Message>>>,
}

impl BsbiIndexer {
    pub fn new(
        data_dir: &Path,
        output_dir: &Path,
        codec: Codec,
        sender: Arc<Mutex<mpsc::Sender<Message>>>,
    ) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            codec,
            term_ids: IdMap::new(),
            doc_ids: IdMap::new(),
            sender,
        }
    }

    /// Builds the full index: parse and invert every block, persist the id
    /// maps, merge the intermediate segments into the main one. The
    /// intermediate files are removed once the merge succeeded.
    pub fn index(&mut self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.output_dir).context("create output directory")?;
        let blocks = self.block_names()?;
        let bar = ProgressBar::new(blocks.len() as u64);

        let mut intermediates = Vec::new();
        for block in &blocks {
            let td_pairs = self.parse_block(block)?;
            let name = format!("intermediate_{block}");
            let mut writer = SegmentWriter::create(&self.output_dir, &name, self.codec)
                .with_context(|| format!("create segment {name}"))?;
            invert_write(&td_pairs, &mut writer)?;
            writer
                .close()
                .with_context(|| format!("close segment {name}"))?;
            intermediates.push(name);
            bar.inc(1);
        }
        bar.finish();

        self.term_ids
            .save(&self.output_dir.join(TERMS_DICT))
            .context("save term id map")?;
        self.doc_ids
            .save(&self.output_dir.join(DOCS_DICT))
            .context("save doc id map")?;

        let mut readers = Vec::new();
        for name in &intermediates {
            readers.push(
                SegmentReader::open(&self.output_dir, name)
                    .with_context(|| format!("open segment {name}"))?,
            );
        }
        let mut merged = SegmentWriter::create(&self.output_dir, MAIN_INDEX, self.codec)
            .context("create main index")?;
        merge_segments(&readers, &mut merged).context("merge intermediate segments")?;
        merged.close().context("close main index")?;
        drop(readers);

        for name in &intermediates {
            let _ = fs::remove_file(self.output_dir.join(format!("{name}.index")));
            let _ = fs::remove_file(self.output_dir.join(format!("{name}.dict")));
        }

        Ok(())
    }

    /// Immediate sub-directories of the collection root, sorted so block
    /// order (and with it id assignment) is reproducible.
    fn block_names(&self) -> anyhow::Result<Vec<String>> {
        let mut blocks = Vec::new();
        for entry in fs::read_dir(&self.data_dir).context("read collection directory")? {
            let entry = entry?;
            if entry.path().is_dir() {
                blocks.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        blocks.sort();
        Ok(blocks)
    }

    /// Turns one block into a sequence of (term id, doc id) pairs, one per
    /// token occurrence.
    ///
    /// Files are enumerated lexicographically and only one level deep.
    /// Reading and analysis fan out across files; interning stays
    /// sequential in file order, so doc and term ids come out the same on
    /// every run. Documents are keyed by their block-relative path. A file
    /// that is not valid UTF-8 is skipped and reported; an unreadable file
    /// aborts the block.
    fn parse_block(&mut self, block: &str) -> anyhow::Result<Vec<(TermId, DocId)>> {
        let block_path = self.data_dir.join(block);
        let mut files: Vec<PathBuf> = fs::read_dir(&block_path)
            .with_context(|| format!("read block directory {block}"))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()
            .context("list block files")?;
        files.retain(|path| path.is_file());
        files.sort();

        let analyzed: Vec<(String, std::io::Result<Option<Vec<String>>>)> = files
            .par_iter()
            .map(|path| {
                let file_name = match path.file_name() {
                    Some(v) => v.to_string_lossy().to_string(),
                    None => "".to_string(),
                };
                let tokens = fs::read(path).map(|bytes| match String::from_utf8(bytes) {
                    Ok(text) => Some(lexer::analyze(&text)),
                    Err(_) => None,
                });
                (file_name, tokens)
            })
            .collect();

        let mut td_pairs = Vec::new();
        for (file_name, tokens) in analyzed {
            let tokens = match tokens.with_context(|| format!("read document {block}/{file_name}"))?
            {
                Some(tokens) => tokens,
                None => {
                    let _ = self.sender.lock().unwrap().send(Message::Error(format!(
                        "Skipped document {block}/{file_name}: not valid UTF-8"
                    )));
                    continue;
                }
            };
            if tokens.is_empty() {
                continue;
            }

            let doc_id = self.doc_ids.intern(&format!("{block}/{file_name}"));
            for token in &tokens {
                td_pairs.push((self.term_ids.intern(token), doc_id));
            }
        }

        let _ = self.sender.lock().unwrap().send(Message::Info(format!(
            "Parsed block {block}: {} pairs",
            td_pairs.len()
        )));
        Ok(td_pairs)
    }
}

/// Collapses (term id, doc id) pairs into per-term postings and appends
/// them to the segment in ascending term-id order. The pairs of one block
/// are assumed to fit in memory; the ordered maps give the ascending
/// term-id and doc-id iteration the writer requires.
fn invert_write(
    td_pairs: &[(TermId, DocId)],
    writer: &mut SegmentWriter,
) -> anyhow::Result<()> {
    let mut inverted: BTreeMap<TermId, BTreeMap<DocId, TermFrequency>> = BTreeMap::new();
    for &(term_id, doc_id) in td_pairs {
        *inverted
            .entry(term_id)
            .or_default()
            .entry(doc_id)
            .or_insert(0) += 1;
    }

    for (term_id, docs) in inverted {
        let doc_ids: Vec<DocId> = docs.keys().copied().collect();
        let tfs: Vec<TermFrequency> = docs.values().copied().collect();
        writer
            .append(term_id, &doc_ids, &tfs)
            .with_context(|| format!("append postings for term {term_id}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sender() -> Arc<Mutex<mpsc::Sender<Message>>> {
        let (sender, receiver) = mpsc::channel();
        // keep no receiver around; sends are best-effort
        drop(receiver);
        Arc::new(Mutex::new(sender))
    }

    fn write_collection(root: &Path, blocks: &[(&str, &[(&str, &str)])]) {
        for (block, files) in blocks {
            let dir = root.join(block);
            fs::create_dir_all(&dir).unwrap();
            for (name, body) in *files {
                fs::write(dir.join(name), body).unwrap();
            }
        }
    }

    #[test]
    fn indexing_produces_main_index_and_dictionaries() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_collection(
            data.path(),
            &[
                ("blk1", &[("a.txt", "fever cough fever"), ("b.txt", "cough headache")]),
                ("blk2", &[("c.txt", "headache fever")]),
            ],
        );

        let mut indexer =
            BsbiIndexer::new(data.path(), out.path(), Codec::Vbe, test_sender());
        indexer.index().unwrap();

        assert!(out.path().join("main_index.index").exists());
        assert!(out.path().join("main_index.dict").exists());
        assert!(out.path().join(TERMS_DICT).exists());
        assert!(out.path().join(DOCS_DICT).exists());
        // intermediates are removed after a successful merge
        assert!(!out.path().join("intermediate_blk1.index").exists());
        assert!(!out.path().join("intermediate_blk2.dict").exists());

        let docs = IdMap::load(&out.path().join(DOCS_DICT)).unwrap();
        assert_eq!(docs.name_of(0), Some("blk1/a.txt"));
        assert_eq!(docs.name_of(1), Some("blk1/b.txt"));
        assert_eq!(docs.name_of(2), Some("blk2/c.txt"));

        let reader = SegmentReader::open(out.path(), MAIN_INDEX).unwrap();
        assert_eq!(reader.num_docs(), 3);
        assert_eq!(reader.doc_length(0), Some(3));
        assert_eq!(reader.doc_length(1), Some(2));
        assert_eq!(reader.doc_length(2), Some(2));

        let terms = IdMap::load(&out.path().join(TERMS_DICT)).unwrap();
        let fever = terms.get_id("fever").unwrap();
        let (doc_ids, tfs) = reader.get_postings(fever).unwrap().unwrap();
        assert_eq!(doc_ids, vec![0, 2]);
        assert_eq!(tfs, vec![2, 1]);
    }

    #[test]
    fn empty_documents_get_no_doc_id() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_collection(
            data.path(),
            &[("blk1", &[("empty.txt", "..."), ("real.txt", "fever")])],
        );

        let mut indexer =
            BsbiIndexer::new(data.path(), out.path(), Codec::Vbe, test_sender());
        indexer.index().unwrap();

        let docs = IdMap::load(&out.path().join(DOCS_DICT)).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs.name_of(0), Some("blk1/real.txt"));
    }

    #[test]
    fn invalid_utf8_is_skipped() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let dir = data.path().join("blk1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("bad.txt"), [0xFF, 0xFE, 0xFD]).unwrap();
        fs::write(dir.join("good.txt"), "fever").unwrap();

        let mut indexer =
            BsbiIndexer::new(data.path(), out.path(), Codec::Vbe, test_sender());
        indexer.index().unwrap();

        let docs = IdMap::load(&out.path().join(DOCS_DICT)).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs.name_of(0), Some("blk1/good.txt"));
    }

    #[test]
    fn nested_directories_are_not_descended() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let dir = data.path().join("blk1");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("a.txt"), "fever").unwrap();
        fs::write(dir.join("nested").join("b.txt"), "cough").unwrap();

        let mut indexer =
            BsbiIndexer::new(data.path(), out.path(), Codec::Vbe, test_sender());
        indexer.index().unwrap();

        let docs = IdMap::load(&out.path().join(DOCS_DICT)).unwrap();
        assert_eq!(docs.len(), 1);

        let terms = IdMap::load(&out.path().join(TERMS_DICT)).unwrap();
        assert!(terms.contains("fever"));
        assert!(!terms.contains("cough"));
    }
}
