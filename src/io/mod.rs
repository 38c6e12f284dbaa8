//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `serial_scanner` - Serial reader for line-framed scanner payloads
//! - `scan_listener` - TCP listener for networked scan stations
//! - `mqtt` - MQTT client for scan and control topics
//! - `resolver` - Product reference lookup (trait + JSON table)
//! - `interactions` - Interaction lookup (trait + HTTP client)
//! - `egress` - Committed scan records to file (JSONL format)
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `mqtt_egress` - MQTT publisher for egress events
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress;
pub mod egress_channel;
pub mod interactions;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;
pub mod resolver;
pub mod scan_listener;
pub mod serial_scanner;

// Re-export commonly used types
pub use egress_channel::{
    create_egress_channel, EgressSender, ScanErrorPayload, ScanPayload, WarningsPayload,
};
pub use interactions::{HttpInteractionLookup, InteractionLookup};
pub use mqtt_egress::MqttPublisher;
pub use resolver::{JsonProductDb, ProductResolver};
pub use scan_listener::{start_scan_listener, ScanListenerConfig};
pub use serial_scanner::SerialScanner;
