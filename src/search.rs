use anyhow::Context;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use crate::bsbi::{DOCS_DICT, MAIN_INDEX, TERMS_DICT};
use crate::idmap::IdMap;
use crate::lexer;
use crate::segment::{DocId, IndexError, SegmentReader};

/// Result depth used when callers do not ask for one.
pub const DEFAULT_BM25_K: usize = 100;
pub const DEFAULT_TFIDF_K: usize = 10;

/// Okapi BM25 parameters.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term frequency saturation.
    pub k1: f64,
    /// Strength of document length normalization.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Term-at-a-time scoring over the merged index.
///
/// Holds the segment reader and both id maps read-only, so one searcher
/// can serve any number of queries; each query gets its own accumulator.
pub struct Searcher {
    reader: SegmentReader,
    term_ids: IdMap,
    doc_ids: IdMap,
}

impl Searcher {
    /// Opens the merged index under `index_dir` together with its id maps
    /// and verifies the segment was built by the analyzer this engine
    /// queries with.
    pub fn open(index_dir: &Path) -> anyhow::Result<Self> {
        let reader = SegmentReader::open(index_dir, MAIN_INDEX).context("open main index")?;
        if reader.analyzer() != lexer::ANALYZER_ID {
            return Err(IndexError::AnalyzerMismatch {
                index: reader.analyzer().to_string(),
                engine: lexer::ANALYZER_ID.to_string(),
            }
            .into());
        }
        let term_ids = IdMap::load(&index_dir.join(TERMS_DICT)).context("load term id map")?;
        let doc_ids = IdMap::load(&index_dir.join(DOCS_DICT)).context("load doc id map")?;
        Ok(Self {
            reader,
            term_ids,
            doc_ids,
        })
    }

    /// Okapi BM25 ranking. Query terms missing from the vocabulary are
    /// skipped; a query with none left scores nothing and returns an empty
    /// list. IDF is `ln(N / df)` without a floor, so terms present in most
    /// documents can contribute negatively, as the formula says.
    pub fn bm25(
        &self,
        query: &str,
        k: usize,
        params: &Bm25Params,
    ) -> Result<Vec<(String, f64)>, IndexError> {
        let Bm25Params { k1, b } = *params;
        let avg_doc_length = self.reader.avg_doc_length();
        let scores = self.accumulate(query, |idf, tf, doc_length| {
            let tf = f64::from(tf);
            let norm = k1 * ((1.0 - b) + b * (doc_length as f64 / avg_doc_length)) + tf;
            idf * tf * (k1 + 1.0) / norm
        })?;
        self.rank(scores, k)
    }

    /// Auxiliary log-TF·IDF ranking: `ln(N/df) · (1 + ln tf)`, no length
    /// normalization.
    pub fn tfidf(&self, query: &str, k: usize) -> Result<Vec<(String, f64)>, IndexError> {
        let scores = self.accumulate(query, |idf, tf, _| idf * (1.0 + f64::from(tf).ln()))?;
        self.rank(scores, k)
    }

    /// Streams the postings of every in-vocabulary query term and folds
    /// the weighted contributions into a per-doc accumulator.
    fn accumulate<F>(&self, query: &str, weight: F) -> Result<HashMap<DocId, f64>, IndexError>
    where
        F: Fn(f64, u32, u64) -> f64,
    {
        let mut scores: HashMap<DocId, f64> = HashMap::new();
        let num_docs = self.reader.num_docs() as f64;

        for token in lexer::analyze(query) {
            let Some(term_id) = self.term_ids.get_id(&token) else {
                continue;
            };
            let Some(df) = self.reader.df(term_id) else {
                continue;
            };
            let idf = (num_docs / f64::from(df)).ln();

            let Some((doc_ids, tfs)) = self.reader.get_postings(term_id)? else {
                continue;
            };
            for (&doc_id, &tf) in doc_ids.iter().zip(&tfs) {
                let doc_length = self
                    .reader
                    .doc_length(doc_id)
                    .ok_or(IndexError::UnknownDoc(doc_id))?;
                *scores.entry(doc_id).or_insert(0.0) += weight(idf, tf, doc_length);
            }
        }
        Ok(scores)
    }

    /// Orders the accumulator by score descending, ties by ascending doc
    /// id, cuts to `k` and resolves display names.
    fn rank(
        &self,
        scores: HashMap<DocId, f64>,
        k: usize,
    ) -> Result<Vec<(String, f64)>, IndexError> {
        let mut ranked: Vec<(DocId, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(doc_id, score)| {
                let name = self
                    .doc_ids
                    .name_of(doc_id)
                    .ok_or(IndexError::UnknownDoc(doc_id))?;
                Ok((name.to_string(), score))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::segment::{SegmentWriter, TermFrequency, TermId};

    // terms and file names chosen so stemming maps them onto themselves
    fn build_index(
        dir: &Path,
        terms: &[&str],
        docs: &[&str],
        postings: &[(TermId, Vec<DocId>, Vec<TermFrequency>)],
    ) -> Searcher {
        let mut term_ids = IdMap::new();
        for term in terms {
            term_ids.intern(term);
        }
        let mut doc_ids = IdMap::new();
        for doc in docs {
            doc_ids.intern(doc);
        }
        term_ids.save(&dir.join(TERMS_DICT)).unwrap();
        doc_ids.save(&dir.join(DOCS_DICT)).unwrap();

        let mut writer = SegmentWriter::create(dir, MAIN_INDEX, Codec::Vbe).unwrap();
        for (term_id, doc_list, tfs) in postings {
            writer.append(*term_id, doc_list, tfs).unwrap();
        }
        writer.close().unwrap();

        Searcher::open(dir).unwrap()
    }

    #[test]
    fn bm25_ranks_higher_tf_first() {
        let dir = tempfile::tempdir().unwrap();
        // A: "cat dog cat", B: "dog dog bird", C: "bird cat"
        let searcher = build_index(
            dir.path(),
            &["cat", "dog", "bird"],
            &["blk1/a.txt", "blk1/b.txt", "blk1/c.txt"],
            &[
                (0, vec![0, 2], vec![2, 1]),
                (1, vec![0, 1], vec![1, 2]),
                (2, vec![1, 2], vec![1, 1]),
            ],
        );

        let hits = searcher.bm25("cat", 10, &Bm25Params::default()).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "blk1/a.txt");
        assert_eq!(hits[1].0, "blk1/c.txt");
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn ties_break_by_ascending_doc_id() {
        let dir = tempfile::tempdir().unwrap();
        let searcher = build_index(
            dir.path(),
            &["cat"],
            &["blk1/a.txt", "blk1/b.txt", "blk1/c.txt"],
            &[(0, vec![0, 1, 2], vec![1, 1, 1])],
        );

        let hits = searcher.bm25("cat", 10, &Bm25Params::default()).unwrap();
        let names: Vec<&str> = hits.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["blk1/a.txt", "blk1/b.txt", "blk1/c.txt"]);

        let truncated = searcher.bm25("cat", 2, &Bm25Params::default()).unwrap();
        assert_eq!(truncated.len(), 2);
    }

    #[test]
    fn term_in_every_doc_has_zero_idf() {
        let dir = tempfile::tempdir().unwrap();
        let searcher = build_index(
            dir.path(),
            &["cat"],
            &["blk1/a.txt", "blk1/b.txt"],
            &[(0, vec![0, 1], vec![3, 1])],
        );

        // df == N, so ln(N/df) == 0 and every contribution is zero
        let hits = searcher.bm25("cat", 10, &Bm25Params::default()).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].1, 0.0);
        assert_eq!(hits[1].1, 0.0);
        assert_eq!(hits[0].0, "blk1/a.txt");
    }

    #[test]
    fn absent_terms_are_skipped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let searcher = build_index(
            dir.path(),
            &["cat"],
            &["blk1/a.txt"],
            &[(0, vec![0], vec![1])],
        );

        assert!(searcher.bm25("xyzzy", 10, &Bm25Params::default()).unwrap().is_empty());
        assert!(searcher.tfidf("xyzzy plugh", 10).unwrap().is_empty());
        // a query that analyzes to nothing behaves the same
        assert!(searcher.bm25("the of and", 10, &Bm25Params::default()).unwrap().is_empty());
    }

    #[test]
    fn tfidf_uses_log_tf() {
        let dir = tempfile::tempdir().unwrap();
        let searcher = build_index(
            dir.path(),
            &["cat", "dog"],
            &["blk1/a.txt", "blk1/b.txt"],
            &[(0, vec![0], vec![4]), (1, vec![1], vec![1])],
        );

        let hits = searcher.tfidf("cat", 10).unwrap();
        assert_eq!(hits.len(), 1);
        let expected = (2.0f64).ln() * (1.0 + (4.0f64).ln());
        assert!((hits[0].1 - expected).abs() < 1e-12);
    }
}
