//! MQTT client for receiving scan payloads
//!
//! Subscribes to two topics:
//! - the scans topic, whose message payload is the raw scan text verbatim
//!   (an empty payload signals a cancelled capture)
//! - the control topic, carrying `clear` / `refresh <n>` session commands

use crate::domain::types::{RawScan, ScanCommand, ScanSource};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Parse a control topic payload into a command
fn parse_control(payload: &str) -> Option<ScanCommand> {
    let payload = payload.trim();
    if payload == "clear" {
        return Some(ScanCommand::ClearHistory);
    }
    if let Some(index) = payload.strip_prefix("refresh ") {
        if let Ok(index) = index.trim().parse::<usize>() {
            return Some(ScanCommand::Refresh { index });
        }
    }
    None
}

/// Start the MQTT client and send scan commands to the channel
///
/// Commands are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped scans are counted in metrics and logged (rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    command_tx: mpsc::Sender<ScanCommand>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut mqttoptions = MqttOptions::new("mediscan", config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_scans_topic(), QoS::AtLeastOnce).await?;
    client.subscribe(config.mqtt_control_topic(), QoS::AtMostOnce).await?;

    info!(
        scans_topic = %config.mqtt_scans_topic(),
        control_topic = %config.mqtt_control_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_client_subscribed"
    );

    let scans_topic = config.mqtt_scans_topic().to_string();
    let control_topic = config.mqtt_control_topic().to_string();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            // Check for shutdown signal
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            // Process MQTT events
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let topic = &publish.topic;
                        let payload = match std::str::from_utf8(&publish.payload) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(topic = %topic, error = %e, "mqtt_invalid_utf8");
                                continue;
                            }
                        };

                        let command = if topic == &scans_topic {
                            // Empty payload = cancelled capture
                            let contents = if payload.trim().is_empty() {
                                None
                            } else {
                                Some(payload.to_string())
                            };
                            debug!(cancelled = %contents.is_none(), "mqtt_scan_received");
                            Some(ScanCommand::Scan(RawScan::new(contents, ScanSource::Mqtt)))
                        } else if topic == &control_topic {
                            let command = parse_control(payload);
                            if command.is_none() {
                                debug!(payload = %payload, "mqtt_unknown_control");
                            }
                            command
                        } else {
                            None
                        };

                        let Some(command) = command else { continue };

                        if let Err(e) = command_tx.try_send(command) {
                            match e {
                                TrySendError::Full(_) => {
                                    metrics.record_scan_dropped();
                                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                        warn!("mqtt_scan_dropped: channel full");
                                        last_drop_warn = Instant::now();
                                    }
                                }
                                TrySendError::Closed(_) => {
                                    warn!("mqtt_command_channel_closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_clear() {
        assert!(matches!(parse_control("clear"), Some(ScanCommand::ClearHistory)));
        assert!(matches!(parse_control(" clear \n"), Some(ScanCommand::ClearHistory)));
    }

    #[test]
    fn test_parse_control_refresh() {
        assert!(matches!(parse_control("refresh 0"), Some(ScanCommand::Refresh { index: 0 })));
        assert!(matches!(parse_control("refresh 12"), Some(ScanCommand::Refresh { index: 12 })));
    }

    #[test]
    fn test_parse_control_noise() {
        assert!(parse_control("").is_none());
        assert!(parse_control("refresh").is_none());
        assert!(parse_control("refresh x").is_none());
        assert!(parse_control("open sesame").is_none());
    }
}
