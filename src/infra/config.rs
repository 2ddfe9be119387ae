//! Configuration loading from TOML files
//!
//! The binary selects the file with `--config <path>` (or the `CONFIG_FILE`
//! environment variable), defaulting to `config/journey.toml`.
//!
//! Each `[[journeys]]` table corresponds to one configured journey (one
//! coordinator and one sensor). `[[zones]]` seed fixed zones into the state
//! store alongside whatever the statestream publishes.

use anyhow::{bail, Context};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::domain::types::slugify;

/// Routing provider selected for a journey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Provider {
    #[serde(rename = "Google", alias = "google")]
    Google,
    #[serde(rename = "HERE", alias = "here", alias = "Here")]
    Here,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "Google",
            Provider::Here => "HERE",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self { host: default_mqtt_host(), port: default_mqtt_port(), username: None, password: None }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatestreamConfig {
    /// Base topic configured in Home Assistant's `mqtt_statestream`
    #[serde(default = "default_statestream_base")]
    pub base_topic: String,
}

impl Default for StatestreamConfig {
    fn default() -> Self {
        Self { base_topic: default_statestream_base() }
    }
}

fn default_statestream_base() -> String {
    "homeassistant".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// Publish sensor state over MQTT
    #[serde(default = "default_egress_enabled")]
    pub enabled: bool,
    /// Topic prefix for sensor state, attributes and availability
    #[serde(default = "default_egress_base")]
    pub base_topic: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { enabled: default_egress_enabled(), base_topic: default_egress_base() }
    }
}

fn default_egress_enabled() -> bool {
    true
}

fn default_egress_base() -> String {
    "journey".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Fixed refresh interval
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// Minimum spacing between debounced (attribute-only) refreshes
    #[serde(default = "default_request_refresh_cooldown")]
    pub request_refresh_cooldown_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            request_refresh_cooldown_secs: default_request_refresh_cooldown(),
        }
    }
}

fn default_scan_interval() -> u64 {
    300
}

fn default_request_refresh_cooldown() -> u64 {
    1800
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// HTTP timeout for routing provider requests
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
    /// Check each journey's credentials before starting it
    #[serde(default = "default_validate_credentials")]
    pub validate_credentials: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_api_timeout(),
            validate_credentials: default_validate_credentials(),
        }
    }
}

fn default_api_timeout() -> u64 {
    10
}

fn default_validate_credentials() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: 0 }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

/// A fixed zone (e.g. home) seeded into the state store as `zone.<id>`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_zone_radius")]
    pub radius: f64,
}

fn default_zone_radius() -> f64 {
    100.0
}

impl ZoneConfig {
    pub fn entity_id(&self) -> String {
        let object_id = self.id.clone().unwrap_or_else(|| slugify(&self.name));
        format!("zone.{}", object_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TomlJourney {
    name: String,
    #[serde(default)]
    id: Option<String>,
    origin: String,
    destination: String,
    api_token: String,
    #[serde(default = "default_selected_api")]
    selected_api: Provider,
}

fn default_selected_api() -> Provider {
    Provider::Google
}

/// One configured journey
#[derive(Debug, Clone, PartialEq)]
pub struct JourneyConfig {
    /// Stable identifier, used for the sensor's unique id and topics
    pub id: String,
    pub name: String,
    pub origin: String,
    pub destination: String,
    pub api_token: String,
    pub selected_api: Provider,
}

#[derive(Debug, Clone, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    mqtt: MqttConfig,
    #[serde(default)]
    statestream: StatestreamConfig,
    #[serde(default)]
    egress: EgressConfig,
    #[serde(default)]
    coordinator: CoordinatorConfig,
    #[serde(default)]
    api: ApiConfig,
    #[serde(default)]
    metrics: MetricsConfig,
    #[serde(default)]
    zones: Vec<ZoneConfig>,
    #[serde(default)]
    journeys: Vec<TomlJourney>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    statestream_base_topic: String,
    egress_enabled: bool,
    egress_base_topic: String,
    scan_interval: Duration,
    request_refresh_cooldown: Duration,
    api_timeout: Duration,
    validate_credentials: bool,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    zones: Vec<ZoneConfig>,
    journeys: Vec<JourneyConfig>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_username: None,
            mqtt_password: None,
            statestream_base_topic: default_statestream_base(),
            egress_enabled: default_egress_enabled(),
            egress_base_topic: default_egress_base(),
            scan_interval: Duration::from_secs(default_scan_interval()),
            request_refresh_cooldown: Duration::from_secs(default_request_refresh_cooldown()),
            api_timeout: Duration::from_secs(default_api_timeout()),
            validate_credentials: default_validate_credentials(),
            metrics_interval_secs: default_metrics_interval(),
            prometheus_port: 0,
            zones: Vec::new(),
            journeys: Vec::new(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig =
            toml::from_str(content).with_context(|| format!("Failed to parse config {}", source))?;

        if toml_config.coordinator.scan_interval_secs == 0 {
            bail!("coordinator.scan_interval_secs must be at least 1");
        }

        let mut seen = FxHashSet::default();
        let mut journeys = Vec::with_capacity(toml_config.journeys.len());
        for journey in toml_config.journeys {
            let id = journey.id.clone().unwrap_or_else(|| slugify(&journey.name));
            if id.is_empty() {
                bail!("journey '{}' has no usable id", journey.name);
            }
            if !seen.insert(id.clone()) {
                bail!("duplicate journey id '{}'", id);
            }
            if journey.origin.trim().is_empty() || journey.destination.trim().is_empty() {
                bail!("journey '{}' needs both an origin and a destination", id);
            }
            if journey.api_token.trim().is_empty() {
                bail!("journey '{}' has an empty api_token", id);
            }
            journeys.push(JourneyConfig {
                id,
                name: journey.name,
                origin: journey.origin.trim().to_string(),
                destination: journey.destination.trim().to_string(),
                api_token: journey.api_token,
                selected_api: journey.selected_api,
            });
        }

        Ok(Self {
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            statestream_base_topic: toml_config.statestream.base_topic,
            egress_enabled: toml_config.egress.enabled,
            egress_base_topic: toml_config.egress.base_topic,
            scan_interval: Duration::from_secs(toml_config.coordinator.scan_interval_secs),
            request_refresh_cooldown: Duration::from_secs(
                toml_config.coordinator.request_refresh_cooldown_secs,
            ),
            api_timeout: Duration::from_secs(toml_config.api.timeout_secs),
            validate_credentials: toml_config.api.validate_credentials,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            zones: toml_config.zones,
            journeys,
            config_file: source.to_string(),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn statestream_base_topic(&self) -> &str {
        &self.statestream_base_topic
    }

    pub fn egress_enabled(&self) -> bool {
        self.egress_enabled
    }

    pub fn egress_base_topic(&self) -> &str {
        &self.egress_base_topic
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn request_refresh_cooldown(&self) -> Duration {
        self.request_refresh_cooldown
    }

    pub fn api_timeout(&self) -> Duration {
        self.api_timeout
    }

    pub fn validate_credentials(&self) -> bool {
        self.validate_credentials
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn zones(&self) -> &[ZoneConfig] {
        &self.zones
    }

    pub fn journeys(&self) -> &[JourneyConfig] {
        &self.journeys
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
