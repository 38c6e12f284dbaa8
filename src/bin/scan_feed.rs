//! Scan feed tool
//!
//! Sends scan payloads to the gateway's TCP listener, speaking the same
//! line protocol as a networked scan station. Useful for exercising the
//! decode/resolve/aggregate pipeline without scanner hardware.
//!
//! Usage:
//!   cargo run --bin scan-feed -- --addr 127.0.0.1:7701 --payload 3400930000120
//!   cargo run --bin scan-feed -- --demo
//!   cargo run --bin scan-feed -- --cancel
//!   cargo run --bin scan-feed -- --clear

use clap::Parser;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(name = "scan-feed", about = "Send scan payloads to the gateway TCP listener")]
struct Args {
    /// Gateway scan listener address
    #[arg(long, default_value = "127.0.0.1:7701")]
    addr: String,

    /// Single payload to send (bare code or full traceability string)
    #[arg(long)]
    payload: Option<String>,

    /// Send a demo sequence of payloads
    #[arg(long)]
    demo: bool,

    /// Send a cancelled capture
    #[arg(long)]
    cancel: bool,

    /// Clear the session history
    #[arg(long)]
    clear: bool,

    /// Refresh interactions for a history entry
    #[arg(long)]
    refresh: Option<usize>,

    /// Delay between demo payloads (ms)
    #[arg(long, default_value = "200")]
    delay_ms: u64,
}

/// Demo payloads: two traceability codes and one bare code
const DEMO_PAYLOADS: &[&str] = &[
    "]010340093000012017270331109X4Z1Q",
    "3400935955838",
    "]01034009304785791726113010A11111",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut stream = TcpStream::connect(&args.addr).await?;
    println!("connected to {}", args.addr);

    let mut lines: Vec<String> = Vec::new();

    if let Some(payload) = &args.payload {
        lines.push(format!("SCAN {payload}"));
    }
    if args.cancel {
        lines.push("CANCEL".to_string());
    }
    if args.clear {
        lines.push("CLEAR".to_string());
    }
    if let Some(index) = args.refresh {
        lines.push(format!("REFRESH {index}"));
    }
    if args.demo || lines.is_empty() {
        lines.extend(DEMO_PAYLOADS.iter().map(|p| format!("SCAN {p}")));
    }

    for line in lines {
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        println!("sent: {line}");
        tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
    }

    stream.flush().await?;
    Ok(())
}
