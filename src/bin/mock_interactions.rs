//! Mock interaction lookup service
//!
//! Simulates the external interaction service for local testing.
//!
//! Behavior:
//! 1. Listens on a configurable port (default 7702)
//! 2. POST /interactions with {"target": "...", "history": ["...", ...]}
//!    answers the interactions between target and the history codes from a
//!    built-in pair table, de-duplicated by unordered pair
//! 3. --fail makes every request answer 503 (for testing the gateway's
//!    degraded commit path)
//!
//! Usage:
//!   cargo run --bin mock-interactions -- --port 7702
//!   cargo run --bin mock-interactions -- --fail

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "mock-interactions")]
#[command(about = "Mock interaction lookup service for local simulation")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "7702")]
    port: u16,

    /// Simulated response latency (ms)
    #[arg(long, default_value = "50")]
    latency_ms: u64,

    /// Answer every request with 503
    #[arg(long)]
    fail: bool,
}

#[derive(Deserialize)]
struct LookupRequest {
    target: String,
    history: Vec<String>,
}

#[derive(Serialize)]
struct Interaction {
    target: String,
    other: String,
    message: String,
    severity: Option<String>,
}

/// Known interacting substance pairs (code, code, severity)
const PAIR_TABLE: &[(&str, &str, &str)] = &[
    ("60002283", "64372098", "association deconseillee"),
    ("60002283", "67119691", "precaution d'emploi"),
    ("64372098", "62682161", "contre-indication"),
];

/// Interactions between target and the history codes, de-duplicated by
/// unordered pair
fn interactions_for(target: &str, history: &[String]) -> Vec<Interaction> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut result = Vec::new();

    for other in history {
        if other == target {
            // Self-pairs are excluded by contract
            continue;
        }

        let key = if target < other.as_str() {
            (target.to_string(), other.clone())
        } else {
            (other.clone(), target.to_string())
        };
        if seen.contains(&key) {
            continue;
        }

        let matched = PAIR_TABLE.iter().find(|(a, b, _)| {
            (*a == target && b == other) || (*b == target && a == other)
        });
        if let Some((_, _, severity)) = matched {
            seen.insert(key);
            result.push(Interaction {
                target: target.to_string(),
                other: other.clone(),
                message: format!("interaction between {target} and {other}"),
                severity: Some(severity.to_string()),
            });
        }
    }

    result
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    latency: Duration,
    fail: bool,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, "/interactions") => {
            tokio::time::sleep(latency).await;

            if fail {
                return Ok(json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    r#"{"error":"simulated failure"}"#.to_string(),
                ));
            }

            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => {
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        r#"{"error":"unreadable body"}"#.to_string(),
                    ));
                }
            };

            let request: LookupRequest = match serde_json::from_slice(&body) {
                Ok(request) => request,
                Err(e) => {
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        format!(r#"{{"error":"{e}"}}"#),
                    ));
                }
            };

            let interactions = interactions_for(&request.target, &request.history);
            println!(
                "lookup target={} history={} -> {} interactions",
                request.target,
                request.history.len(),
                interactions.len()
            );

            let json = serde_json::to_string(&interactions).unwrap_or_else(|_| "[]".to_string());
            Ok(json_response(StatusCode::OK, json))
        }
        (&Method::GET, "/health") => Ok(json_response(StatusCode::OK, r#"{"ok":true}"#.to_string())),
        _ => Ok(json_response(StatusCode::NOT_FOUND, r#"{"error":"not found"}"#.to_string())),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    let latency = Duration::from_millis(args.latency_ms);

    println!("mock-interactions listening on {addr} (fail={})", args.fail);

    loop {
        let (stream, _addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let fail = args.fail;

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, latency, fail));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                eprintln!("http error: {e}");
            }
        });
    }
}
