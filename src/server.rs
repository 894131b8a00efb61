use anyhow::Context;
use serde::Serialize;
use tiny_http::{Header, Method, Response, Server};

use std::io::Read;
use std::path::Path;
use std::time::Instant;

use crate::search::{Bm25Params, DEFAULT_BM25_K, Searcher};

#[derive(Serialize)]
struct Hit {
    doc: String,
    score: f64,
}

#[derive(Serialize)]
struct QueryResponse {
    duration_ms: u128,
    count: usize,
    results: Vec<Hit>,
}

/// Serves BM25 queries over HTTP: `POST /query` with the raw query string
/// as body. The searcher is opened once and shared by every request.
pub fn run_server(index_dir: &Path, port: u16) -> anyhow::Result<()> {
    let searcher = Searcher::open(index_dir).context("open index for serving")?;
    let addr = format!("0.0.0.0:{port}");
    let server = match Server::http(&addr) {
        Ok(val) => val,
        Err(err) => anyhow::bail!("Failed to bind server to {addr}: {err}"),
    };
    println!("Server listening on port {port}");

    for mut request in server.incoming_requests() {
        println!(
            "{method} {url}",
            method = request.method(),
            url = request.url()
        );

        match &request.method() {
            Method::Get => match request.url() {
                "/" => {
                    let response =
                        Response::from_string("POST /query with the query string as body\n");
                    let _ = request.respond(response);
                }
                _ => {
                    let response = Response::from_string(format!(
                        "Route not Allowed: {url}",
                        url = request.url()
                    ));
                    let _ = request.respond(response.with_status_code(404));
                }
            },
            Method::Post => match request.url() {
                "/query" => {
                    let mut body = String::new();
                    let _ = request.as_reader().read_to_string(&mut body);

                    let started = Instant::now();
                    match searcher.bm25(body.trim(), DEFAULT_BM25_K, &Bm25Params::default()) {
                        Ok(hits) => {
                            let payload = QueryResponse {
                                duration_ms: started.elapsed().as_millis(),
                                count: hits.len(),
                                results: hits
                                    .into_iter()
                                    .map(|(doc, score)| Hit { doc, score })
                                    .collect(),
                            };
                            let body = serde_json::to_string(&payload).unwrap_or_default();
                            let mut response = Response::from_string(body);
                            if let Ok(header) =
                                Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                            {
                                response = response.with_header(header);
                            }
                            let _ = request.respond(response);
                        }
                        Err(err) => {
                            let response =
                                Response::from_string(format!("Failed to search for query: {err}"));
                            let _ = request.respond(response.with_status_code(500));
                        }
                    };
                }
                _ => {
                    let response = Response::from_string(format!(
                        "Route not Allowed: {url}",
                        url = request.url()
                    ));
                    let _ = request.respond(response.with_status_code(403));
                }
            },
            _ => {
                let response = Response::from_string(format!(
                    "Method Not Allowed: {method}",
                    method = request.method()
                ));
                let _ = request.respond(response.with_status_code(403));
            }
        }
    }
    Ok(())
}
