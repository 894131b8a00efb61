use anyhow::Context;
use medsearch::{Config, ErrorHandler, handle_messages, index_documents, search_bm25, search_tfidf};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use clap::Parser;

use medsearch::codec::Codec;
use medsearch::search::{Bm25Params, DEFAULT_BM25_K, DEFAULT_TFIDF_K};
use medsearch::server::run_server;

#[derive(Parser, Debug)]
#[command(
    name = "Medsearch",
    about = "A BM25 search engine for medical document collections",
    version = env!("CARGO_PKG_VERSION")
)]
struct Args {
    /// The key functionality commands
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'l',
        long = "log",
        help = "Redirect indexing reports to a file"
    )]
    log_file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Build an index for a collection directory
    Index {
        #[clap(
            short = 'd',
            long = "data",
            help = "Collection root, one sub-directory per block"
        )]
        data_dir: PathBuf,
        #[clap(short = 'o', long = "output", help = "Path to index directory")]
        output_dir: Option<PathBuf>,
        #[clap(long = "codec", default_value = "vbe", help = "Postings encoding: vbe or std")]
        codec: String,
    },
    /// Query some search term using the index
    Search {
        #[arg(short = 'i', long = "index", help = "Path to index directory")]
        index_dir: Option<PathBuf>,
        #[arg(short = 'q', long = "query", help = "Query to search")]
        query: String,
        #[arg(short = 'c', long = "count", help = "Number of results")]
        result_count: Option<usize>,
        #[arg(long = "tfidf", help = "Rank with log TF-IDF instead of BM25")]
        tfidf: bool,
        #[arg(long = "k1", default_value_t = 1.5, help = "BM25 k1 parameter")]
        k1: f64,
        #[arg(short = 'b', long = "b", default_value_t = 0.75, help = "BM25 b parameter")]
        b: f64,
    },
    /// Serve the search engine via http
    Serve {
        #[arg(short = 'i', long = "index", help = "Path to index directory")]
        index_dir: Option<PathBuf>,
        #[arg(short = 'p', long = "port", help = "Port number")]
        port: Option<u16>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut home_dir = home::home_dir().unwrap_or(Path::new(".").to_path_buf());
    home_dir.push(".medsearch");
    let error_handler = match args.log_file {
        Some(file) => ErrorHandler::File(file),
        None => ErrorHandler::Stderr,
    };

    let default_index = home_dir.join("index");

    let (sender, receiver) = mpsc::channel();
    let sender = Arc::new(Mutex::new(sender));

    match args.command {
        Commands::Index {
            data_dir,
            output_dir,
            codec,
        } => {
            let codec =
                Codec::from_tag(&codec).with_context(|| format!("unknown codec {codec:?}"))?;
            let cfg = Config {
                data_dir,
                index_dir: output_dir.unwrap_or(default_index),
                codec,
                sender,
            };

            thread::spawn(move || {
                loop {
                    let _ = handle_messages(&receiver, &error_handler);
                }
            });
            index_documents(&cfg)?;
        }
        Commands::Search {
            index_dir,
            query,
            result_count,
            tfidf,
            k1,
            b,
        } => {
            let index_dir = index_dir.unwrap_or(default_index);
            let results = if tfidf {
                search_tfidf(&index_dir, &query, result_count.unwrap_or(DEFAULT_TFIDF_K))?
            } else {
                let params = Bm25Params { k1, b };
                search_bm25(
                    &index_dir,
                    &query,
                    result_count.unwrap_or(DEFAULT_BM25_K),
                    &params,
                )?
            };

            if results.is_empty() {
                eprintln!("Zero Results");
                return Ok(());
            }

            for (doc, score) in results {
                println!("{score:.4}\t{doc}");
            }
        }
        Commands::Serve { index_dir, port } => {
            let port = port.unwrap_or(8765);
            let index_dir = index_dir.unwrap_or(default_index);

            run_server(&index_dir, port)?;
        }
    }
    Ok(())
}
