//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Re-exports for the Prometheus endpoint and egress payloads
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps interval counters to get a
/// consistent snapshot.
pub struct Metrics {
    /// Capture outcomes processed by the session (monotonic)
    scans_total: AtomicU64,
    /// Scans since last report (reset on report)
    scans_since_report: AtomicU64,
    /// Sum of scan processing latencies in microseconds (reset on report)
    scan_latency_sum_us: AtomicU64,
    /// Max scan processing latency (reset on report)
    scan_latency_max_us: AtomicU64,
    /// Scan processing latency histogram buckets (reset on report)
    scan_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Payloads decoded as structured traceability records (monotonic)
    decoded_traceability_total: AtomicU64,
    /// Payloads that fell back to a bare code (monotonic)
    decoded_bare_total: AtomicU64,
    /// Scans committed to history (monotonic)
    commits_total: AtomicU64,
    /// Cancelled captures (monotonic)
    cancelled_total: AtomicU64,
    /// Blank payload rejections (monotonic)
    empty_payload_total: AtomicU64,
    /// Resolver miss rejections (monotonic)
    unknown_product_total: AtomicU64,
    /// Refresh operations served (monotonic)
    refreshes_total: AtomicU64,
    /// Interaction lookups attempted (monotonic)
    lookups_total: AtomicU64,
    /// Interaction lookups that failed (monotonic)
    lookup_failures_total: AtomicU64,
    /// Lookups since last report (reset on report)
    lookups_since_report: AtomicU64,
    /// Lookup latency histogram buckets (reset on report)
    lookup_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of lookup latencies (reset on report)
    lookup_latency_sum_us: AtomicU64,
    /// Max lookup latency (reset on report)
    lookup_latency_max_us: AtomicU64,
    /// Current history length (gauge, set on mutation)
    history_len: AtomicU64,
    /// History clears (monotonic)
    clears_total: AtomicU64,
    /// Scans dropped because the command channel was full (monotonic)
    scans_dropped: AtomicU64,
    /// Current command queue depth (snapshot, updated by sampler)
    command_queue_depth: AtomicU64,
    /// Last report time (only accessed from reporters)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_total: AtomicU64::new(0),
            scans_since_report: AtomicU64::new(0),
            scan_latency_sum_us: AtomicU64::new(0),
            scan_latency_max_us: AtomicU64::new(0),
            scan_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            decoded_traceability_total: AtomicU64::new(0),
            decoded_bare_total: AtomicU64::new(0),
            commits_total: AtomicU64::new(0),
            cancelled_total: AtomicU64::new(0),
            empty_payload_total: AtomicU64::new(0),
            unknown_product_total: AtomicU64::new(0),
            refreshes_total: AtomicU64::new(0),
            lookups_total: AtomicU64::new(0),
            lookup_failures_total: AtomicU64::new(0),
            lookups_since_report: AtomicU64::new(0),
            lookup_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            lookup_latency_sum_us: AtomicU64::new(0),
            lookup_latency_max_us: AtomicU64::new(0),
            history_len: AtomicU64::new(0),
            clears_total: AtomicU64::new(0),
            scans_dropped: AtomicU64::new(0),
            command_queue_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a capture outcome was fully processed with given latency (lock-free)
    #[inline]
    pub fn record_scan_processed(&self, latency_us: u64) {
        self.scans_total.fetch_add(1, Ordering::Relaxed);
        self.scans_since_report.fetch_add(1, Ordering::Relaxed);
        self.scan_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.scan_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.scan_latency_max_us, latency_us);
    }

    /// Record a successful decode (lock-free)
    #[inline]
    pub fn record_decoded(&self, traceability: bool) {
        if traceability {
            self.decoded_traceability_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.decoded_bare_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a committed scan (lock-free)
    #[inline]
    pub fn record_commit(&self) {
        self.commits_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cancelled capture (lock-free)
    #[inline]
    pub fn record_cancelled(&self) {
        self.cancelled_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a blank payload rejection (lock-free)
    #[inline]
    pub fn record_empty_payload(&self) {
        self.empty_payload_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a resolver miss rejection (lock-free)
    #[inline]
    pub fn record_unknown_product(&self) {
        self.unknown_product_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refresh operation (lock-free)
    #[inline]
    pub fn record_refresh(&self) {
        self.refreshes_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an interaction lookup attempt with latency (lock-free)
    #[inline]
    pub fn record_lookup(&self, latency_us: u64, failed: bool) {
        self.lookups_total.fetch_add(1, Ordering::Relaxed);
        self.lookups_since_report.fetch_add(1, Ordering::Relaxed);
        self.lookup_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.lookup_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.lookup_latency_max_us, latency_us);

        if failed {
            self.lookup_failures_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Set the current history length gauge
    #[inline]
    pub fn set_history_len(&self, len: usize) {
        self.history_len.store(len as u64, Ordering::Relaxed);
    }

    /// Record a history clear (lock-free)
    #[inline]
    pub fn record_clear(&self) {
        self.clears_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a scan dropped because the command channel was full (lock-free)
    #[inline]
    pub fn record_scan_dropped(&self) {
        self.scans_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the command queue depth snapshot
    #[inline]
    pub fn set_command_queue_depth(&self, depth: u64) {
        self.command_queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Get total scans processed
    #[inline]
    #[allow(dead_code)]
    pub fn scans_total(&self) -> u64 {
        self.scans_total.load(Ordering::Relaxed)
    }

    /// Generate a report, resetting interval counters
    pub fn report(&self) -> MetricsSummary {
        let mut last_report = self.last_report_time.lock();
        let elapsed = last_report.elapsed();
        *last_report = Instant::now();
        drop(last_report);

        let scans_interval = self.scans_since_report.swap(0, Ordering::Relaxed);
        let scan_latency_sum = self.scan_latency_sum_us.swap(0, Ordering::Relaxed);
        let scan_latency_max = self.scan_latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.scan_latency_buckets);

        let lookups_interval = self.lookups_since_report.swap(0, Ordering::Relaxed);
        let lookup_latency_sum = self.lookup_latency_sum_us.swap(0, Ordering::Relaxed);
        let lookup_latency_max = self.lookup_latency_max_us.swap(0, Ordering::Relaxed);
        let lookup_lat_buckets = swap_buckets(&self.lookup_latency_buckets);

        let elapsed_secs = elapsed.as_secs_f64();
        let scans_per_sec =
            if elapsed_secs > 0.0 { scans_interval as f64 / elapsed_secs } else { 0.0 };

        MetricsSummary {
            scans_total: self.scans_total.load(Ordering::Relaxed),
            scans_per_sec,
            avg_scan_latency_us: if scans_interval > 0 {
                scan_latency_sum / scans_interval
            } else {
                0
            },
            max_scan_latency_us: scan_latency_max,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            decoded_traceability_total: self.decoded_traceability_total.load(Ordering::Relaxed),
            decoded_bare_total: self.decoded_bare_total.load(Ordering::Relaxed),
            commits_total: self.commits_total.load(Ordering::Relaxed),
            cancelled_total: self.cancelled_total.load(Ordering::Relaxed),
            empty_payload_total: self.empty_payload_total.load(Ordering::Relaxed),
            unknown_product_total: self.unknown_product_total.load(Ordering::Relaxed),
            refreshes_total: self.refreshes_total.load(Ordering::Relaxed),
            lookups_total: self.lookups_total.load(Ordering::Relaxed),
            lookup_failures_total: self.lookup_failures_total.load(Ordering::Relaxed),
            lookup_avg_latency_us: if lookups_interval > 0 {
                lookup_latency_sum / lookups_interval
            } else {
                0
            },
            lookup_max_latency_us: lookup_latency_max,
            lookup_lat_p99_us: percentile_from_buckets(&lookup_lat_buckets, 0.99),
            lookup_lat_buckets,
            history_len: self.history_len.load(Ordering::Relaxed),
            clears_total: self.clears_total.load(Ordering::Relaxed),
            scans_dropped: self.scans_dropped.load(Ordering::Relaxed),
            command_queue_depth: self.command_queue_depth.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub scans_total: u64,
    pub scans_per_sec: f64,
    pub avg_scan_latency_us: u64,
    pub max_scan_latency_us: u64,
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub decoded_traceability_total: u64,
    pub decoded_bare_total: u64,
    pub commits_total: u64,
    pub cancelled_total: u64,
    pub empty_payload_total: u64,
    pub unknown_product_total: u64,
    pub refreshes_total: u64,
    pub lookups_total: u64,
    pub lookup_failures_total: u64,
    pub lookup_avg_latency_us: u64,
    pub lookup_max_latency_us: u64,
    pub lookup_lat_p99_us: u64,
    pub lookup_lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub history_len: u64,
    pub clears_total: u64,
    pub scans_dropped: u64,
    pub command_queue_depth: u64,
}

impl MetricsSummary {
    /// Log the summary as a structured event
    pub fn log(&self) {
        info!(
            scans_total = %self.scans_total,
            scans_per_sec = %format!("{:.2}", self.scans_per_sec),
            avg_latency_us = %self.avg_scan_latency_us,
            max_latency_us = %self.max_scan_latency_us,
            p50_us = %self.lat_p50_us,
            p95_us = %self.lat_p95_us,
            p99_us = %self.lat_p99_us,
            traceability = %self.decoded_traceability_total,
            bare = %self.decoded_bare_total,
            commits = %self.commits_total,
            cancelled = %self.cancelled_total,
            empty = %self.empty_payload_total,
            unknown = %self.unknown_product_total,
            refreshes = %self.refreshes_total,
            lookups = %self.lookups_total,
            lookup_failures = %self.lookup_failures_total,
            lookup_avg_us = %self.lookup_avg_latency_us,
            lookup_p99_us = %self.lookup_lat_p99_us,
            history_len = %self.history_len,
            clears = %self.clears_total,
            dropped = %self.scans_dropped,
            queue_depth = %self.command_queue_depth,
            "metrics_report"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_report_resets_interval_counters() {
        let metrics = Metrics::new();
        metrics.record_scan_processed(500);
        metrics.record_scan_processed(1500);

        let summary = metrics.report();
        assert_eq!(summary.scans_total, 2);
        assert_eq!(summary.avg_scan_latency_us, 1000);
        assert_eq!(summary.max_scan_latency_us, 1500);

        // Interval counters are reset; monotonic totals survive
        let summary = metrics.report();
        assert_eq!(summary.scans_total, 2);
        assert_eq!(summary.avg_scan_latency_us, 0);
        assert_eq!(summary.max_scan_latency_us, 0);
    }

    #[test]
    fn test_outcome_counters() {
        let metrics = Metrics::new();
        metrics.record_decoded(true);
        metrics.record_decoded(false);
        metrics.record_commit();
        metrics.record_cancelled();
        metrics.record_empty_payload();
        metrics.record_unknown_product();
        metrics.record_lookup(2000, true);
        metrics.record_lookup(1000, false);
        metrics.set_history_len(4);
        metrics.record_clear();

        let summary = metrics.report();
        assert_eq!(summary.decoded_traceability_total, 1);
        assert_eq!(summary.decoded_bare_total, 1);
        assert_eq!(summary.commits_total, 1);
        assert_eq!(summary.cancelled_total, 1);
        assert_eq!(summary.empty_payload_total, 1);
        assert_eq!(summary.unknown_product_total, 1);
        assert_eq!(summary.lookups_total, 2);
        assert_eq!(summary.lookup_failures_total, 1);
        assert_eq!(summary.lookup_avg_latency_us, 1500);
        assert_eq!(summary.history_len, 4);
        assert_eq!(summary.clears_total, 1);
    }

    #[test]
    fn test_percentile_from_empty_buckets() {
        let buckets = [0u64; METRICS_NUM_BUCKETS];
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 0);
    }
}
