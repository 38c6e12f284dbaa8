//! TCP scan listener
//!
//! Listens for connections from networked scan stations. Line protocol:
//! - `SCAN <payload>` - one captured payload
//! - `CANCEL` - capture was cancelled (surfaced as a cancelled outcome,
//!   never a decode error)
//! - `CLEAR` - remove all history records
//! - `REFRESH <n>` - re-query interactions for history entry n

use crate::domain::types::{RawScan, ScanCommand, ScanSource};
use crate::infra::metrics::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Scan listener configuration
#[derive(Debug, Clone)]
pub struct ScanListenerConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for ScanListenerConfig {
    fn default() -> Self {
        Self { port: 7701, enabled: true }
    }
}

/// Start the TCP scan listener
///
/// Commands are sent via try_send to avoid blocking - drops are counted in
/// metrics.
pub async fn start_scan_listener(
    config: ScanListenerConfig,
    command_tx: mpsc::Sender<ScanCommand>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.enabled {
        info!("scan_listener_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(port = %config.port, "scan_listener_started");

    loop {
        tokio::select! {
            // Check for shutdown
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scan_listener_shutdown");
                    return Ok(());
                }
            }
            // Accept new connections
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let tx = command_tx.clone();
                        let m = metrics.clone();
                        tokio::spawn(async move {
                            handle_scan_connection(socket, addr, tx, m).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "scan_listener_accept_failed");
                    }
                }
            }
        }
    }
}

/// Parse one protocol line into a command, or None for noise
fn parse_line(line: &str) -> Option<ScanCommand> {
    let line = line.trim();

    if let Some(payload) = line.strip_prefix("SCAN ") {
        let payload = payload.trim();
        if payload.is_empty() {
            return None;
        }
        return Some(ScanCommand::Scan(RawScan::new(Some(payload.to_string()), ScanSource::Tcp)));
    }

    if line == "CANCEL" {
        return Some(ScanCommand::Scan(RawScan::new(None, ScanSource::Tcp)));
    }

    if line == "CLEAR" {
        return Some(ScanCommand::ClearHistory);
    }

    if let Some(index) = line.strip_prefix("REFRESH ") {
        if let Ok(index) = index.trim().parse::<usize>() {
            return Some(ScanCommand::Refresh { index });
        }
    }

    None
}

async fn handle_scan_connection(
    socket: tokio::net::TcpStream,
    addr: SocketAddr,
    command_tx: mpsc::Sender<ScanCommand>,
    metrics: Arc<Metrics>,
) {
    let peer_ip = addr.ip().to_string();
    debug!(ip = %peer_ip, "scan_connection_accepted");

    let reader = BufReader::new(socket);
    let mut lines = reader.lines();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    while let Ok(Some(line)) = lines.next_line().await {
        let Some(command) = parse_line(&line) else {
            if !line.trim().is_empty() {
                debug!(peer_ip = %peer_ip, line = %line, "scan_unknown_message");
            }
            continue;
        };

        if let ScanCommand::Scan(ref raw) = command {
            info!(
                peer_ip = %peer_ip,
                cancelled = %raw.contents.is_none(),
                "scan_received"
            );
        }

        // Use try_send to never block the connection handler
        match command_tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics.record_scan_dropped();
                // Rate-limit warning to 1 per second
                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!(peer_ip = %peer_ip, "scan_dropped: channel full");
                    last_drop_warn = Instant::now();
                }
            }
            Err(TrySendError::Closed(_)) => {
                warn!(peer_ip = %peer_ip, "scan_channel_closed");
                break;
            }
        }
    }

    debug!(peer_ip = %peer_ip, "scan_connection_closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_line() {
        let command = parse_line("SCAN ]010340093000012017240615109X4Z1Q").unwrap();
        let ScanCommand::Scan(raw) = command else { panic!("expected scan") };
        assert_eq!(raw.contents.as_deref(), Some("]010340093000012017240615109X4Z1Q"));
        assert_eq!(raw.source, ScanSource::Tcp);
    }

    #[test]
    fn test_parse_cancel_line() {
        let command = parse_line("CANCEL").unwrap();
        let ScanCommand::Scan(raw) = command else { panic!("expected scan") };
        assert!(raw.contents.is_none());
    }

    #[test]
    fn test_parse_clear_and_refresh() {
        assert!(matches!(parse_line("CLEAR"), Some(ScanCommand::ClearHistory)));
        assert!(matches!(parse_line("REFRESH 2"), Some(ScanCommand::Refresh { index: 2 })));
    }

    #[test]
    fn test_parse_noise() {
        assert!(parse_line("").is_none());
        assert!(parse_line("SCAN ").is_none());
        assert!(parse_line("REFRESH abc").is_none());
        assert!(parse_line("HELLO").is_none());
    }
}
