//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., a pharmacy or ward name)
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "mediscan".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic carrying raw scan payloads (empty payload = cancelled capture)
    #[serde(default = "default_scans_topic")]
    pub scans_topic: String,
    /// Topic carrying session control commands (clear, refresh <n>)
    #[serde(default = "default_control_topic")]
    pub control_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            scans_topic: default_scans_topic(),
            control_topic: default_control_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_scans_topic() -> String {
    "mediscan/ingest/scans".to_string()
}

fn default_control_topic() -> String {
    "mediscan/ingest/control".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    /// Enable the serial scanner reader
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_serial_device")]
    pub device: String,
    #[serde(default = "default_serial_baud")]
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { enabled: false, device: default_serial_device(), baud: default_serial_baud() }
    }
}

fn default_serial_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_serial_baud() -> u32 {
    9600
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanListenerConfig {
    /// Enable the TCP scan listener
    #[serde(default = "default_listener_enabled")]
    pub enabled: bool,
    #[serde(default = "default_listener_port")]
    pub port: u16,
}

impl Default for ScanListenerConfig {
    fn default() -> Self {
        Self { enabled: default_listener_enabled(), port: default_listener_port() }
    }
}

fn default_listener_enabled() -> bool {
    true
}

fn default_listener_port() -> u16 {
    7701
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// JSON product reference table
    #[serde(default = "default_products_file")]
    pub products_file: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { products_file: default_products_file() }
    }
}

fn default_products_file() -> String {
    "config/products.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionsConfig {
    /// Interaction service endpoint; credentials may be embedded in the URL
    #[serde(default = "default_interactions_url")]
    pub api_url: String,
    #[serde(default = "default_interactions_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for InteractionsConfig {
    fn default() -> Self {
        Self { api_url: default_interactions_url(), timeout_ms: default_interactions_timeout_ms() }
    }
}

fn default_interactions_url() -> String {
    "http://localhost:7702/interactions".to_string()
}

fn default_interactions_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for committed scan records (JSONL format)
    #[serde(default = "default_egress_file")]
    pub file: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { file: default_egress_file() }
    }
}

fn default_egress_file() -> String {
    "scans.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { bind_address: default_broker_bind_address(), port: default_broker_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for committed scans (QoS 1)
    #[serde(default = "default_egress_scans_topic")]
    pub scans_topic: String,
    /// Topic for interaction warnings (QoS 1)
    #[serde(default = "default_egress_warnings_topic")]
    pub warnings_topic: String,
    /// Topic for rejected scans (QoS 0)
    #[serde(default = "default_egress_errors_topic")]
    pub errors_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_egress_metrics_topic")]
    pub metrics_topic: String,
    /// Interval for publishing metrics (seconds)
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            scans_topic: default_egress_scans_topic(),
            warnings_topic: default_egress_warnings_topic(),
            errors_topic: default_egress_errors_topic(),
            metrics_topic: default_egress_metrics_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_egress_scans_topic() -> String {
    "mediscan/scans".to_string()
}

fn default_egress_warnings_topic() -> String {
    "mediscan/warnings".to_string()
}

fn default_egress_errors_topic() -> String {
    "mediscan/errors".to_string()
}

fn default_egress_metrics_topic() -> String {
    "mediscan/metrics".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub scan_listener: ScanListenerConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub interactions: InteractionsConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_scans_topic: String,
    mqtt_control_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    serial_enabled: bool,
    serial_device: String,
    serial_baud: u32,
    scan_listener_enabled: bool,
    scan_listener_port: u16,
    products_file: String,
    interactions_api_url: String,
    interactions_timeout_ms: u64,
    egress_file: String,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    broker_bind_address: String,
    broker_port: u16,
    mqtt_egress_enabled: bool,
    mqtt_egress_scans_topic: String,
    mqtt_egress_warnings_topic: String,
    mqtt_egress_errors_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_scans_topic: toml_config.mqtt.scans_topic,
            mqtt_control_topic: toml_config.mqtt.control_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            serial_enabled: toml_config.serial.enabled,
            serial_device: toml_config.serial.device,
            serial_baud: toml_config.serial.baud,
            scan_listener_enabled: toml_config.scan_listener.enabled,
            scan_listener_port: toml_config.scan_listener.port,
            products_file: toml_config.resolver.products_file,
            interactions_api_url: toml_config.interactions.api_url,
            interactions_timeout_ms: toml_config.interactions.timeout_ms,
            egress_file: toml_config.egress.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_scans_topic: toml_config.mqtt_egress.scans_topic,
            mqtt_egress_warnings_topic: toml_config.mqtt_egress.warnings_topic,
            mqtt_egress_errors_topic: toml_config.mqtt_egress.errors_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_metrics_interval_secs: toml_config
                .mqtt_egress
                .metrics_publish_interval_secs,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn with_egress_file(mut self, path: &str) -> Self {
        self.egress_file = path.to_string();
        self
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_scans_topic(&self) -> &str {
        &self.mqtt_scans_topic
    }

    pub fn mqtt_control_topic(&self) -> &str {
        &self.mqtt_control_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn serial_enabled(&self) -> bool {
        self.serial_enabled
    }

    pub fn serial_device(&self) -> &str {
        &self.serial_device
    }

    pub fn serial_baud(&self) -> u32 {
        self.serial_baud
    }

    pub fn scan_listener_enabled(&self) -> bool {
        self.scan_listener_enabled
    }

    pub fn scan_listener_port(&self) -> u16 {
        self.scan_listener_port
    }

    pub fn products_file(&self) -> &str {
        &self.products_file
    }

    pub fn interactions_api_url(&self) -> &str {
        &self.interactions_api_url
    }

    pub fn interactions_timeout_ms(&self) -> u64 {
        self.interactions_timeout_ms
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_scans_topic(&self) -> &str {
        &self.mqtt_egress_scans_topic
    }

    pub fn mqtt_egress_warnings_topic(&self) -> &str {
        &self.mqtt_egress_warnings_topic
    }

    pub fn mqtt_egress_errors_topic(&self) -> &str {
        &self.mqtt_egress_errors_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "mediscan");
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.mqtt_scans_topic(), "mediscan/ingest/scans");
        assert!(!config.serial_enabled());
        assert!(config.scan_listener_enabled());
        assert_eq!(config.scan_listener_port(), 7701);
        assert_eq!(config.interactions_timeout_ms(), 2000);
        assert_eq!(config.egress_file(), "scans.jsonl");
        assert!(config.mqtt_egress_enabled());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let toml_config: TomlConfig = toml::from_str("").unwrap();
        let config = Config::from_toml(toml_config, "empty");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.products_file(), "config/products.json");
        assert_eq!(config.mqtt_egress_metrics_interval_secs(), 5);
    }
}
