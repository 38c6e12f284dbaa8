//! Mediscan gateway - pharmaceutical scan decoding and interaction history
//!
//! Decodes traceability payloads scanned from packaging and maintains a
//! session-ordered scan history used to surface drug-interaction warnings.
//!
//! Module structure:
//! - `domain/` - Core business types (DecodedCode, ScanRecord, Product)
//! - `io/` - External interfaces (scanner inputs, resolver, lookup, egress)
//! - `services/` - Business logic (ScanSession, ScanHistory, Aggregator)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use mediscan::infra::{Config, Metrics};
use mediscan::io::{
    create_egress_channel, start_scan_listener, HttpInteractionLookup, JsonProductDb,
    MqttPublisher, ProductResolver, ScanListenerConfig, SerialScanner,
};
use mediscan::services::ScanSession;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Mediscan gateway - scan decoding and interaction warning service
#[derive(Parser, Debug)]
#[command(name = "mediscan", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("mediscan starting");

    // Parse command line arguments using clap
    let args = Args::parse();

    // Load configuration from TOML file (needed for broker config)
    let config = Config::load_from_path(&args.config);

    // Start embedded MQTT broker with config
    mediscan::infra::broker::start_embedded_broker(&config);

    // Log configuration
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        scans_topic = %config.mqtt_scans_topic(),
        serial_enabled = %config.serial_enabled(),
        scan_listener_port = %config.scan_listener_port(),
        products_file = %config.products_file(),
        interactions_api = %config.interactions_api_url(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared metrics
    let metrics = Arc::new(Metrics::new());

    // Product reference table; an empty table keeps the service up but every
    // scan fails UnknownProduct until the file is fixed
    let resolver: Arc<dyn ProductResolver> = match JsonProductDb::from_file(config.products_file())
    {
        Ok(db) => Arc::new(db),
        Err(e) => {
            warn!(error = %e, "product_table_unavailable, starting with empty table");
            Arc::new(JsonProductDb::empty())
        }
    };

    // Interaction lookup service client
    let lookup = Arc::new(HttpInteractionLookup::new(
        config.interactions_api_url(),
        config.interactions_timeout_ms(),
    ));

    // Create command channel (bounded for backpressure)
    let (command_tx, command_rx) = mpsc::channel(1000);

    // Start serial scanner reader (if enabled)
    if config.serial_enabled() {
        let scanner = SerialScanner::new(&config, command_tx.clone(), metrics.clone());
        let serial_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            scanner.run(serial_shutdown).await;
        });
    }

    // Start TCP scan listener
    let listener_config = ScanListenerConfig {
        port: config.scan_listener_port(),
        enabled: config.scan_listener_enabled(),
    };
    let listener_tx = command_tx.clone();
    let listener_metrics = metrics.clone();
    let listener_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            start_scan_listener(listener_config, listener_tx, listener_metrics, listener_shutdown)
                .await
        {
            tracing::error!(error = %e, "scan listener error");
        }
    });

    // Start MQTT client
    let mqtt_config = config.clone();
    let mqtt_tx = command_tx;
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            mediscan::io::mqtt::start_mqtt_client(&mqtt_config, mqtt_tx, mqtt_metrics, mqtt_shutdown)
                .await
        {
            tracing::error!(error = %e, "MQTT client error");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = mediscan::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());

        // Start MQTT egress publisher
        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        // Start metrics egress publisher (separate from logging)
        let metrics_egress = egress_sender.clone();
        let metrics_for_egress = metrics.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(egress_interval));
            loop {
                interval.tick().await;
                metrics_egress.send_metrics(metrics_for_egress.report());
            }
        });

        Some(egress_sender)
    } else {
        None
    };

    // Start the scan session (main command processing loop)
    let mut session = ScanSession::new(&config, resolver, lookup, metrics, egress_sender);
    info!("scan_session_started");

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run session - consumes commands until channel closes
    session.run(command_rx).await;

    info!("mediscan shutdown complete");
    Ok(())
}
