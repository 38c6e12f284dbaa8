//! Embedded MQTT broker using rumqttd
//!
//! Lets scan stations and UI clients connect to the gateway directly
//! without an external broker deployment. Set the broker port to 0 to
//! disable it and use an external broker instead.

use crate::infra::config::Config as AppConfig;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use tracing::{info, warn};

/// Scan payloads are tiny; 64 KiB leaves generous headroom for metrics
/// snapshots and warning batches.
const MAX_PAYLOAD_SIZE: usize = 65536;

/// Start the embedded MQTT broker with configuration.
/// Returns false when the broker is disabled or misconfigured.
pub fn start_embedded_broker(app_config: &AppConfig) -> bool {
    let port = app_config.broker_port();
    if port == 0 {
        info!("broker_disabled");
        return false;
    }

    let addr_str = format!("{}:{}", app_config.broker_bind_address(), port);
    let listen_addr: SocketAddr = match addr_str.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(error = %e, addr = %addr_str, "broker_invalid_bind_address");
            return false;
        }
    };

    let mut servers = HashMap::new();
    servers.insert(
        "v4".to_string(),
        ServerSettings {
            name: "v4".to_string(),
            listen: listen_addr,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                max_payload_size: MAX_PAYLOAD_SIZE,
                max_inflight_count: 100,
                auth: None,
                dynamic_filters: false,
                external_auth: None,
            },
        },
    );

    let config = Config {
        id: 0,
        router: RouterConfig {
            max_segment_size: 1048576,
            max_segment_count: 10,
            // A site has a handful of scan stations plus UI clients
            max_connections: 128,
            max_outgoing_packet_count: 200,
            initialized_filters: None,
            ..Default::default()
        },
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    };

    thread::spawn(move || {
        let mut broker = Broker::new(config);
        // start() blocks for the life of the broker
        if let Err(e) = broker.start() {
            warn!(error = %e, "broker_start_failed");
        }
    });

    // Give broker time to start before clients connect
    thread::sleep(std::time::Duration::from_millis(100));
    info!(addr = %addr_str, "broker_started");
    true
}
