pub mod bsbi;
pub mod codec;
pub mod idmap;
pub mod lexer;
pub mod merge;
pub mod search;
pub mod segment;
pub mod server;

use anyhow::Context;

use crate::bsbi::BsbiIndexer;
use crate::codec::Codec;
use crate::search::{Bm25Params, Searcher};

use std::fs;
use std::io::{Write, stderr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};

pub struct Config {
    pub data_dir: PathBuf,  /* collection root, one sub-directory per block */
    pub index_dir: PathBuf, /* where segments and dictionaries land */
    pub codec: Codec,       /* postings encoding */
    pub sender: Arc<Mutex<mpsc::Sender<Message>>>, /* non-fatal reports */
}

/// A report from the indexing pipeline that should not abort it.
pub enum Message {
    Info(String),
    Error(String),
}

#[derive(Clone)]
pub enum ErrorHandler {
    Stderr,
    File(PathBuf),
}

/// Builds the inverted index for the collection described by `cfg`.
pub fn index_documents(cfg: &Config) -> anyhow::Result<()> {
    println!("Indexing collection {:?}...", cfg.data_dir);
    let mut indexer = BsbiIndexer::new(
        &cfg.data_dir,
        &cfg.index_dir,
        cfg.codec,
        Arc::clone(&cfg.sender),
    );
    indexer.index().context("build index")?;
    println!("Completed indexing into {:?}", cfg.index_dir);
    Ok(())
}

/// Runs one BM25 query against the index under `index_dir`.
pub fn search_bm25(
    index_dir: &Path,
    query: &str,
    k: usize,
    params: &Bm25Params,
) -> anyhow::Result<Vec<(String, f64)>> {
    let searcher = Searcher::open(index_dir)?;
    let results = searcher.bm25(query, k, params).context("score query")?;
    Ok(results)
}

/// Runs one log-TF·IDF query against the index under `index_dir`.
pub fn search_tfidf(index_dir: &Path, query: &str, k: usize) -> anyhow::Result<Vec<(String, f64)>> {
    let searcher = Searcher::open(index_dir)?;
    let results = searcher.tfidf(query, k).context("score query")?;
    Ok(results)
}

/// Drains one message from the indexing pipeline into the configured
/// stream. Run in a loop on its own thread.
pub fn handle_messages(
    receiver: &mpsc::Receiver<Message>,
    error_handler: &ErrorHandler,
) -> anyhow::Result<()> {
    let message = match receiver.recv() {
        Ok(message) => message,
        Err(_) => return Ok(()),
    };
    let line = match message {
        Message::Info(text) => format!("INFO: {text}"),
        Message::Error(text) => format!("ERROR: {text}"),
    };

    match error_handler {
        ErrorHandler::Stderr => {
            let mut stderr = stderr().lock();
            let _ = writeln!(stderr, "{line}");
        }
        ErrorHandler::File(f) => {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(f)
                .context("opening log file")?;

            let _ = writeln!(file, "{line}");
        }
    }
    Ok(())
}
