use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::codec::{Codec, DecodeError};
use crate::lexer;

/// Type alias for Document ID.
pub type DocId = u32;
/// Type alias for Term ID.
pub type TermId = u32;
/// Type alias for Term Frequency.
pub type TermFrequency = u32;

/// Bumped whenever the segment layout changes shape.
pub const SEGMENT_FORMAT_VERSION: u8 = 1;

/// Failure while reading or writing a segment.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("segment io")]
    Io(#[from] std::io::Error),
    #[error("corrupt postings block")]
    Decode(#[from] DecodeError),
    #[error("corrupt segment sidecar")]
    Sidecar(#[from] bincode2::Error),
    #[error("unknown postings codec tag {0:?}")]
    UnknownCodec(String),
    #[error("unsupported segment format version {0}")]
    UnsupportedVersion(u8),
    #[error("index was built with analyzer {index:?}, this engine uses {engine:?}")]
    AnalyzerMismatch { index: String, engine: String },
    #[error("doc id {0} has postings but no dictionary entry")]
    UnknownDoc(DocId),
}

/// Metadata for a term within a segment's dictionary.
#[derive(Serialize, Deserialize, Clone, Copy)]
pub struct TermInfo {
    /// How many documents contain this term within the segment.
    pub df: u32,
    /// Byte offset to the start position of the postings block for this
    /// term in the postings file.
    pub postings_offset: u64,
    /// Number of bytes in the postings block for this term.
    pub postings_len: u64,
}

/// The sidecar written next to a postings file. Term dictionary and
/// doc-length table are kept as vectors sorted by id so the serialized
/// bytes are deterministic for a given segment.
#[derive(Serialize, Deserialize)]
struct SegmentMeta {
    version: u8,
    codec: String,
    analyzer: String,
    term_dict: Vec<(TermId, TermInfo)>,
    doc_lengths: Vec<(DocId, u64)>,
    avg_doc_length: f64,
}

fn postings_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.index"))
}

fn sidecar_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.dict"))
}

/// Writes one segment: a postings file plus its sidecar.
///
/// Terms must be appended in strictly ascending term-id order, and each
/// term exactly once; violating that is a bug in the caller and panics
/// rather than producing a corrupt index. Dropping the writer without
/// calling [`SegmentWriter::close`] leaves no sidecar behind, so a
/// half-written segment is never readable.
pub struct SegmentWriter {
    postings: BufWriter<File>,
    dict_path: PathBuf,
    codec: Codec,
    term_dict: Vec<(TermId, TermInfo)>,
    doc_lengths: BTreeMap<DocId, u64>,
    offset: u64,
}

impl SegmentWriter {
    pub fn create(dir: &Path, name: &str, codec: Codec) -> Result<Self, IndexError> {
        let postings = BufWriter::new(File::create(postings_path(dir, name))?);
        Ok(Self {
            postings,
            dict_path: sidecar_path(dir, name),
            codec,
            term_dict: Vec::new(),
            doc_lengths: BTreeMap::new(),
            offset: 0,
        })
    }

    /// Appends the postings list of one term.
    ///
    /// Doc ids are gap-coded, term frequencies written raw, both through
    /// the configured codec, as two length-prefixed blocks. The per-doc
    /// length accumulator picks up every tf seen here, which is what the
    /// sidecar's doc-length table and `avg_doc_length` are built from.
    ///
    /// # Arguments
    /// * `term_id` - Must be greater than every previously appended id.
    /// * `doc_ids` - Non-empty, strictly ascending.
    /// * `tfs` - Same length as `doc_ids`, every entry >= 1.
    pub fn append(
        &mut self,
        term_id: TermId,
        doc_ids: &[DocId],
        tfs: &[TermFrequency],
    ) -> Result<(), IndexError> {
        if let Some(&(last, _)) = self.term_dict.last() {
            assert!(
                term_id > last,
                "terms must be appended in ascending order: {term_id} after {last}"
            );
        }
        assert!(!doc_ids.is_empty(), "empty postings list for term {term_id}");
        assert_eq!(doc_ids.len(), tfs.len(), "doc id and tf lists differ in length");
        assert!(tfs.iter().all(|&tf| tf >= 1), "zero term frequency for term {term_id}");

        let mut doc_bytes = Vec::new();
        self.codec.encode_gaps(doc_ids, &mut doc_bytes);
        let mut tf_bytes = Vec::new();
        self.codec.encode_seq(tfs, &mut tf_bytes);

        self.postings.write_all(&(doc_bytes.len() as u32).to_le_bytes())?;
        self.postings.write_all(&doc_bytes)?;
        self.postings.write_all(&(tf_bytes.len() as u32).to_le_bytes())?;
        self.postings.write_all(&tf_bytes)?;

        let block_len = 8 + doc_bytes.len() as u64 + tf_bytes.len() as u64;
        self.term_dict.push((
            term_id,
            TermInfo {
                df: doc_ids.len() as u32,
                postings_offset: self.offset,
                postings_len: block_len,
            },
        ));
        self.offset += block_len;

        for (&doc_id, &tf) in doc_ids.iter().zip(tfs) {
            *self.doc_lengths.entry(doc_id).or_insert(0) += u64::from(tf);
        }

        Ok(())
    }

    /// Flushes the postings file and writes the sidecar.
    pub fn close(mut self) -> Result<(), IndexError> {
        self.postings.flush()?;

        let total: u64 = self.doc_lengths.values().sum();
        let avg_doc_length = if self.doc_lengths.is_empty() {
            0.0
        } else {
            total as f64 / self.doc_lengths.len() as f64
        };

        let meta = SegmentMeta {
            version: SEGMENT_FORMAT_VERSION,
            codec: self.codec.tag().to_string(),
            analyzer: lexer::ANALYZER_ID.to_string(),
            term_dict: self.term_dict,
            doc_lengths: self.doc_lengths.into_iter().collect(),
            avg_doc_length,
        };

        let mut writer = BufWriter::new(File::create(&self.dict_path)?);
        bincode2::serialize_into(&mut writer, &meta)?;
        writer.flush()?;
        Ok(())
    }
}

/// Read-only view of one segment.
///
/// The postings file is memory-mapped on open and the sidecar fully
/// loaded, so lookups never mutate the reader and it can be shared across
/// concurrent scorers.
pub struct SegmentReader {
    data: Option<Mmap>,
    codec: Codec,
    analyzer: String,
    term_dict: HashMap<TermId, TermInfo>,
    term_order: Vec<TermId>,
    doc_lengths: HashMap<DocId, u64>,
    avg_doc_length: f64,
}

impl SegmentReader {
    pub fn open(dir: &Path, name: &str) -> Result<Self, IndexError> {
        let mut reader = BufReader::new(File::open(sidecar_path(dir, name))?);
        let meta: SegmentMeta = bincode2::deserialize_from(&mut reader)?;

        if meta.version != SEGMENT_FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(meta.version));
        }
        let codec = Codec::from_tag(&meta.codec).ok_or(IndexError::UnknownCodec(meta.codec))?;

        let file = File::open(postings_path(dir, name))?;
        let data = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: the mapping is read-only and segments are never
            // modified after the writer closed them.
            Some(unsafe { Mmap::map(&file)? })
        };

        let term_order = meta.term_dict.iter().map(|&(id, _)| id).collect();
        Ok(Self {
            data,
            codec,
            analyzer: meta.analyzer,
            term_dict: meta.term_dict.into_iter().collect(),
            term_order,
            doc_lengths: meta.doc_lengths.into_iter().collect(),
            avg_doc_length: meta.avg_doc_length,
        })
    }

    /// Identity of the analyzer the segment was built with.
    pub fn analyzer(&self) -> &str {
        &self.analyzer
    }

    /// Document frequency of a term, `None` if the segment has no entry.
    pub fn df(&self, term_id: TermId) -> Option<u32> {
        self.term_dict.get(&term_id).map(|info| info.df)
    }

    /// Token count of a document.
    pub fn doc_length(&self, doc_id: DocId) -> Option<u64> {
        self.doc_lengths.get(&doc_id).copied()
    }

    pub fn avg_doc_length(&self) -> f64 {
        self.avg_doc_length
    }

    /// Number of documents the segment holds postings for.
    pub fn num_docs(&self) -> usize {
        self.doc_lengths.len()
    }

    /// Decodes the postings list of one term.
    ///
    /// # Returns
    /// `Ok(None)` when the term id is absent from the dictionary; a
    /// [`DecodeError`] wrapped in [`IndexError`] when the block on disk is
    /// corrupt.
    pub fn get_postings(
        &self,
        term_id: TermId,
    ) -> Result<Option<(Vec<DocId>, Vec<TermFrequency>)>, IndexError> {
        match self.term_dict.get(&term_id) {
            None => Ok(None),
            Some(info) => self.read_block(info).map(Some),
        }
    }

    /// Iterates every term of the segment in ascending term-id order,
    /// decoding each postings list. This is the merge input.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = Result<(TermId, Vec<DocId>, Vec<TermFrequency>), IndexError>> + '_
    {
        self.term_order.iter().map(move |&term_id| {
            let (doc_ids, tfs) = self.read_block(&self.term_dict[&term_id])?;
            Ok((term_id, doc_ids, tfs))
        })
    }

    fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    fn read_block(&self, info: &TermInfo) -> Result<(Vec<DocId>, Vec<TermFrequency>), IndexError> {
        let start = usize::try_from(info.postings_offset).map_err(|_| DecodeError::Truncated)?;
        let len = usize::try_from(info.postings_len).map_err(|_| DecodeError::Truncated)?;
        let end = start.checked_add(len).ok_or(DecodeError::Truncated)?;
        let block = self.data().get(start..end).ok_or(DecodeError::Truncated)?;

        let (doc_bytes, rest) = split_length_prefixed(block)?;
        let (tf_bytes, rest) = split_length_prefixed(rest)?;
        if !rest.is_empty() {
            return Err(DecodeError::Truncated.into());
        }

        let doc_ids = self.codec.decode_gaps(doc_bytes)?;
        if doc_ids.len() != info.df as usize {
            return Err(DecodeError::CountMismatch {
                expected: info.df,
                found: doc_ids.len(),
            }
            .into());
        }
        let tfs = self.codec.decode_seq(tf_bytes)?;
        if tfs.len() != info.df as usize {
            return Err(DecodeError::CountMismatch {
                expected: info.df,
                found: tfs.len(),
            }
            .into());
        }
        Ok((doc_ids, tfs))
    }
}

fn split_length_prefixed(bytes: &[u8]) -> Result<(&[u8], &[u8]), DecodeError> {
    if bytes.len() < 4 {
        return Err(DecodeError::Truncated);
    }
    let (prefix, rest) = bytes.split_at(4);
    let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if rest.len() < len {
        return Err(DecodeError::Truncated);
    }
    Ok(rest.split_at(len))
}
