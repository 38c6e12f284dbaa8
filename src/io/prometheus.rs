//! Prometheus metrics HTTP endpoint
//!
//! Exposes gateway metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a gauge metric with f64 value
fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(8192);

    write_scan_metrics(&mut output, site_id, &summary);
    write_outcome_metrics(&mut output, site_id, &summary);
    write_lookup_metrics(&mut output, site_id, &summary);
    write_history_metrics(&mut output, site_id, &summary);

    output
}

fn write_scan_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "mediscan_scans_total",
        "Total capture outcomes processed",
        MetricType::Counter,
        site,
        summary.scans_total,
    );
    write_gauge_f64(
        output,
        "mediscan_scans_per_sec",
        "Scans processed per second",
        site,
        summary.scans_per_sec,
    );
    write_histogram(
        output,
        "mediscan_scan_latency_us",
        "Scan processing latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_scan_latency_us,
    );
    write_metric(
        output,
        "mediscan_scan_latency_p50_us",
        "50th percentile scan latency",
        MetricType::Gauge,
        site,
        summary.lat_p50_us,
    );
    write_metric(
        output,
        "mediscan_scan_latency_p95_us",
        "95th percentile scan latency",
        MetricType::Gauge,
        site,
        summary.lat_p95_us,
    );
    write_metric(
        output,
        "mediscan_scan_latency_p99_us",
        "99th percentile scan latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_outcome_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "mediscan_decoded_traceability_total",
        "Payloads decoded as structured traceability records",
        MetricType::Counter,
        site,
        summary.decoded_traceability_total,
    );
    write_metric(
        output,
        "mediscan_decoded_bare_total",
        "Payloads that fell back to a bare product code",
        MetricType::Counter,
        site,
        summary.decoded_bare_total,
    );
    write_metric(
        output,
        "mediscan_commits_total",
        "Scans committed to history",
        MetricType::Counter,
        site,
        summary.commits_total,
    );
    write_metric(
        output,
        "mediscan_cancelled_total",
        "Cancelled captures",
        MetricType::Counter,
        site,
        summary.cancelled_total,
    );
    write_metric(
        output,
        "mediscan_empty_payload_total",
        "Blank payload rejections",
        MetricType::Counter,
        site,
        summary.empty_payload_total,
    );
    write_metric(
        output,
        "mediscan_unknown_product_total",
        "Resolver miss rejections",
        MetricType::Counter,
        site,
        summary.unknown_product_total,
    );
    write_metric(
        output,
        "mediscan_refreshes_total",
        "Interaction refresh operations served",
        MetricType::Counter,
        site,
        summary.refreshes_total,
    );
}

fn write_lookup_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "mediscan_lookups_total",
        "Interaction lookups attempted",
        MetricType::Counter,
        site,
        summary.lookups_total,
    );
    write_metric(
        output,
        "mediscan_lookup_failures_total",
        "Interaction lookups failed",
        MetricType::Counter,
        site,
        summary.lookup_failures_total,
    );
    write_histogram(
        output,
        "mediscan_lookup_latency_us",
        "Interaction lookup latency in microseconds",
        site,
        &summary.lookup_lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.lookup_avg_latency_us,
    );
    write_metric(
        output,
        "mediscan_lookup_latency_p99_us",
        "99th percentile lookup latency",
        MetricType::Gauge,
        site,
        summary.lookup_lat_p99_us,
    );
}

fn write_history_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "mediscan_history_len",
        "Current history length",
        MetricType::Gauge,
        site,
        summary.history_len,
    );
    write_metric(
        output,
        "mediscan_clears_total",
        "History clears",
        MetricType::Counter,
        site,
        summary.clears_total,
    );
    write_metric(
        output,
        "mediscan_scans_dropped_total",
        "Scans dropped at ingest (channel full)",
        MetricType::Counter,
        site,
        summary.scans_dropped,
    );
    write_metric(
        output,
        "mediscan_command_queue_depth",
        "Current command queue depth",
        MetricType::Gauge,
        site,
        summary.command_queue_depth,
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();

        metrics.record_scan_processed(150);
        metrics.record_scan_processed(250);
        metrics.record_decoded(true);
        metrics.record_commit();
        metrics.record_lookup(1200, false);
        metrics.set_history_len(1);

        let output = format_prometheus_metrics(&metrics, "pharmacy-1");

        assert!(output.contains("mediscan_scans_total{site=\"pharmacy-1\"} 2"));
        assert!(output.contains("mediscan_scan_latency_us_bucket{site=\"pharmacy-1\""));
        assert!(output.contains("mediscan_commits_total{site=\"pharmacy-1\"} 1"));
        assert!(output.contains("mediscan_lookups_total{site=\"pharmacy-1\"} 1"));
        assert!(output.contains("mediscan_history_len{site=\"pharmacy-1\"} 1"));
    }
}
