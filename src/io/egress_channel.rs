//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to hand scan outcomes to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::types::{epoch_ms, Interaction, ScanRecord, SubstanceCode};
use crate::infra::metrics::{MetricsSummary, METRICS_NUM_BUCKETS};
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Committed scan for downstream display and persistence
    Scan(ScanPayload),
    /// Interaction warnings for a scan (commit or refresh)
    Warnings(WarningsPayload),
    /// Rejected scan event for user-visible display
    ScanError(ScanErrorPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Payload for committed scans
#[derive(Debug, Clone, Serialize)]
pub struct ScanPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Record id (UUIDv7)
    pub record_id: String,
    /// Scanned product code
    pub code: String,
    /// Resolved product name
    pub product: String,
    /// Resolved substance code
    pub substance: String,
    /// Commit timestamp (epoch ms)
    pub ts: u64,
    /// Expiry as MM/YYYY when the payload carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lot: Option<String>,
    /// The pack's expiry month has already passed
    pub expired: bool,
    /// Number of interaction warnings attached at commit
    pub warnings: usize,
    /// Interactions could not be computed for this scan
    pub lookup_failed: bool,
}

impl ScanPayload {
    pub fn from_record(record: &ScanRecord) -> Self {
        Self {
            site: None,
            record_id: record.id.clone(),
            code: record.product_code.to_string(),
            product: String::new(),
            substance: String::new(),
            ts: record.scanned_at,
            expiry: record.expiry.map(|e| e.to_string()),
            lot: record.lot.clone(),
            expired: false,
            warnings: 0,
            lookup_failed: false,
        }
    }
}

/// Payload for interaction warnings
#[derive(Debug, Clone, Serialize)]
pub struct WarningsPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Record the warnings belong to
    pub record_id: String,
    /// Target substance the warnings were computed for
    pub target: SubstanceCode,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// "commit" or "refresh"
    pub origin: String,
    pub interactions: Vec<Interaction>,
}

/// Payload for rejected scans
#[derive(Debug, Clone, Serialize)]
pub struct ScanErrorPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Error kind: empty, unknown_product, lookup_failed
    pub kind: String,
    /// Offending product code, when one was decoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message for the UI
    pub message: String,
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Total capture outcomes processed
    pub scans_total: u64,
    /// Scans per second
    pub scans_per_sec: f64,
    /// Average scan processing latency (microseconds)
    pub avg_latency_us: u64,
    /// Max scan processing latency (microseconds)
    pub max_latency_us: u64,
    /// Scan latency histogram buckets (Prometheus-style exponential)
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    /// 50th percentile latency (µs)
    pub lat_p50_us: u64,
    /// 95th percentile latency (µs)
    pub lat_p95_us: u64,
    /// 99th percentile latency (µs)
    pub lat_p99_us: u64,
    /// Payloads decoded as traceability records
    pub traceability_total: u64,
    /// Payloads that fell back to bare codes
    pub bare_total: u64,
    /// Committed scans
    pub commits_total: u64,
    /// Cancelled captures
    pub cancelled_total: u64,
    /// Blank payload rejections
    pub empty_total: u64,
    /// Resolver miss rejections
    pub unknown_total: u64,
    /// Interaction lookups attempted
    pub lookups_total: u64,
    /// Interaction lookups failed
    pub lookup_failures_total: u64,
    /// Average lookup latency (µs)
    pub lookup_avg_latency_us: u64,
    /// 99th percentile lookup latency (µs)
    pub lookup_p99_us: u64,
    /// Current history length
    pub history_len: u64,
    /// Scans dropped at ingest (channel full)
    pub scans_dropped: u64,
    /// Current command queue depth (snapshot)
    pub command_queue_depth: u64,
}

impl MetricsPayload {
    /// Create a metrics payload from a summary with site info
    pub fn from_summary(summary: MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            scans_total: summary.scans_total,
            scans_per_sec: summary.scans_per_sec,
            avg_latency_us: summary.avg_scan_latency_us,
            max_latency_us: summary.max_scan_latency_us,
            lat_buckets: summary.lat_buckets,
            lat_p50_us: summary.lat_p50_us,
            lat_p95_us: summary.lat_p95_us,
            lat_p99_us: summary.lat_p99_us,
            traceability_total: summary.decoded_traceability_total,
            bare_total: summary.decoded_bare_total,
            commits_total: summary.commits_total,
            cancelled_total: summary.cancelled_total,
            empty_total: summary.empty_payload_total,
            unknown_total: summary.unknown_product_total,
            lookups_total: summary.lookups_total,
            lookup_failures_total: summary.lookup_failures_total,
            lookup_avg_latency_us: summary.lookup_avg_latency_us,
            lookup_p99_us: summary.lookup_lat_p99_us,
            history_len: summary.history_len,
            scans_dropped: summary.scans_dropped,
            command_queue_depth: summary.command_queue_depth,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    /// Create a new sender from an mpsc sender
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Send a committed scan for publishing
    /// Injects site_id into the payload
    pub fn send_scan(&self, mut payload: ScanPayload) {
        payload.site = Some(self.site_id.clone());
        // Use try_send to avoid blocking - drop if channel full
        let _ = self.tx.try_send(EgressMessage::Scan(payload));
    }

    /// Send interaction warnings
    /// Injects site_id into the payload
    pub fn send_warnings(&self, mut payload: WarningsPayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Warnings(payload));
    }

    /// Send a rejected scan event
    /// Injects site_id into the payload
    pub fn send_scan_error(&self, mut payload: ScanErrorPayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::ScanError(payload));
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// Buffer size determines how many messages can be queued.
/// site_id is stamped into payloads for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}
