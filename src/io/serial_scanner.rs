//! Serial barcode scanner reader
//!
//! Hardware scanners in keyboard-wedge/serial mode emit one payload per
//! line, CR and/or LF terminated. Payloads can arrive in chunks, so a
//! persistent buffer accumulates bytes across reads and complete lines are
//! framed out of it.

use crate::domain::types::{RawScan, ScanCommand, ScanSource};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, warn};

pub struct SerialScanner {
    device: String,
    baud: u32,
    command_tx: mpsc::Sender<ScanCommand>,
    metrics: Arc<Metrics>,
    /// Persistent read buffer that accumulates bytes across reads.
    /// Payloads can arrive in chunks, so partial lines are kept for the
    /// next read.
    read_buffer: Vec<u8>,
}

impl SerialScanner {
    pub fn new(config: &Config, command_tx: mpsc::Sender<ScanCommand>, metrics: Arc<Metrics>) -> Self {
        Self {
            device: config.serial_device().to_string(),
            baud: config.serial_baud(),
            command_tx,
            metrics,
            read_buffer: Vec::with_capacity(256),
        }
    }

    /// Frame complete lines out of the buffer and forward each payload.
    /// Leftover bytes stay for the next read.
    fn drain_lines(&mut self) {
        while let Some(newline_idx) = self.read_buffer.iter().position(|&b| b == b'\n' || b == b'\r') {
            let line: Vec<u8> = self.read_buffer.drain(..=newline_idx).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }

            match std::str::from_utf8(line) {
                Ok(payload) => {
                    let payload = payload.trim();
                    if payload.is_empty() {
                        continue;
                    }
                    debug!(len = %payload.len(), "serial_scan_received");
                    self.forward(payload.to_string());
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        raw_bytes = %hex::encode(line),
                        "serial_invalid_utf8"
                    );
                }
            }
        }
    }

    fn forward(&self, payload: String) {
        let command = ScanCommand::Scan(RawScan::new(Some(payload), ScanSource::Serial));
        match self.command_tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.record_scan_dropped();
                warn!("serial_scan_dropped: channel full");
            }
            Err(TrySendError::Closed(_)) => {
                warn!("serial_scan_channel_closed");
            }
        }
    }

    /// Start the serial read loop
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(device = %self.device, baud = %self.baud, "serial_scanner_started");

        let port_result = tokio_serial::new(&self.device, self.baud)
            .timeout(Duration::from_millis(100))
            .open_native_async();

        let mut port = match port_result {
            Ok(p) => {
                info!(device = %self.device, "serial_port_opened");
                p
            }
            Err(e) => {
                error!(device = %self.device, error = %e, "serial_port_open_failed");
                return;
            }
        };

        let mut temp_buf = [0u8; 256];

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("serial_scanner_shutdown");
                        return;
                    }
                }
                result = port.read(&mut temp_buf) => {
                    match result {
                        Ok(0) => {
                            // Port closed
                            warn!(device = %self.device, "serial_port_closed");
                            return;
                        }
                        Ok(n) => {
                            self.read_buffer.extend_from_slice(&temp_buf[..n]);
                            self.drain_lines();
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                            // No data, keep waiting
                        }
                        Err(e) => {
                            warn!(error = %e, "serial_read_error");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> (SerialScanner, mpsc::Receiver<ScanCommand>) {
        let (tx, rx) = mpsc::channel(16);
        let scanner = SerialScanner::new(&Config::default(), tx, Arc::new(Metrics::new()));
        (scanner, rx)
    }

    fn next_payload(rx: &mut mpsc::Receiver<ScanCommand>) -> Option<String> {
        match rx.try_recv().ok()? {
            ScanCommand::Scan(raw) => raw.contents,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_complete_line_is_forwarded() {
        let (mut scanner, mut rx) = scanner();

        scanner.read_buffer.extend_from_slice(b"3400930000120\r\n");
        scanner.drain_lines();

        assert_eq!(next_payload(&mut rx).unwrap(), "3400930000120");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_partial_line_is_kept() {
        let (mut scanner, mut rx) = scanner();

        scanner.read_buffer.extend_from_slice(b"34009300");
        scanner.drain_lines();
        assert!(rx.try_recv().is_err());

        // Rest of the payload arrives in a second chunk
        scanner.read_buffer.extend_from_slice(b"00120\n");
        scanner.drain_lines();
        assert_eq!(next_payload(&mut rx).unwrap(), "3400930000120");
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let (mut scanner, mut rx) = scanner();

        scanner
            .read_buffer
            .extend_from_slice(b"3400930000120\r\n]010340093000012017240615109X4Z1Q\r\n");
        scanner.drain_lines();

        assert_eq!(next_payload(&mut rx).unwrap(), "3400930000120");
        assert_eq!(next_payload(&mut rx).unwrap(), "]010340093000012017240615109X4Z1Q");
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let (mut scanner, mut rx) = scanner();

        scanner.read_buffer.extend_from_slice(b"\r\n\r\n  \r\n");
        scanner.drain_lines();

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_invalid_utf8_is_dropped() {
        let (mut scanner, mut rx) = scanner();

        scanner.read_buffer.extend_from_slice(&[0xFF, 0xFE, b'\n']);
        scanner.drain_lines();

        assert!(rx.try_recv().is_err());
        assert!(scanner.read_buffer.is_empty());
    }
}
