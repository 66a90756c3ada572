use crate::correlator::{VinMatching, DEFAULT_LOOKBACK_SECS};
use crate::error::ConfigError;
use crate::mapper::VehicleStrategy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/vehicle-telemetry/config.yaml";
const CONFIG_SEARCH_PATHS: [&str; 3] = [DEFAULT_CONFIG_PATH, "./src/config.yaml", "./config.yaml"];

pub const DEFAULT_REPLAY_SECONDS_BACK: i64 = 3600;
pub const DEFAULT_TRACKED_COLLECTIONS: [&str; 6] = [
    "charge_state",
    "vehicle",
    "custom_data",
    "vehicle_state",
    "climate_state",
    "drive_state",
];

/// What to do when the document store or the metrics sink fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the fault and carry on as if no data existed.
    #[default]
    FailOpen,
    /// Hand the fault back to the caller.
    FailFast,
}

impl FailurePolicy {
    pub fn is_fail_open(self) -> bool {
        matches!(self, FailurePolicy::FailOpen)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub vin: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_true")]
    pub write_to_store: bool,
    #[serde(default = "default_true")]
    pub write_to_sink: bool,
    #[serde(default)]
    pub publish_on_event: bool,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub vehicle_strategy: VehicleStrategy,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    pub namespace: String,
    pub pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            namespace: "tesla".to_string(),
            pool_size: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub server: String,
    pub port: u16,
    pub database: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: 8086,
            database: "tesla".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive_secs: u64,
    pub client_id: String,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            keepalive_secs: 45,
            client_id: "vehicle-telemetry".to_string(),
        }
    }
}

impl PubSubConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub lookback_secs: i64,
    pub vin_matching: VinMatching,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            lookback_secs: DEFAULT_LOOKBACK_SECS,
            vin_matching: VinMatching::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub seconds_back: i64,
    pub collections: Vec<String>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            seconds_back: DEFAULT_REPLAY_SECONDS_BACK,
            collections: DEFAULT_TRACKED_COLLECTIONS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://owner-api.teslamotors.com".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

/// Picks the explicit path when given, otherwise the first existing file of
/// the well-known locations.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::NotFound {
            searched: vec![path.to_path_buf()],
        });
    }

    let candidates: Vec<PathBuf> = CONFIG_SEARCH_PATHS.iter().map(PathBuf::from).collect();
    if let Some(path) = candidates.iter().find(|path| path.is_file()) {
        return Ok(path.clone());
    }
    Err(ConfigError::NotFound {
        searched: candidates,
    })
}

impl Config {
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = resolve_config_path(explicit)?;
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(url) = read("VT_DATABASE_URL").or_else(|| read("DATABASE_URL")) {
            self.store.database_url = Some(url);
        }
        if let Some(token) = read("VT_ACCESS_TOKEN") {
            self.access_token = Some(token);
        }
        if let Some(host) = read("VT_MQTT_HOST") {
            self.pubsub.host = host;
        }
        if let Some(password) = read("VT_MQTT_PASSWORD") {
            self.pubsub.password = Some(password);
        }
        if let Some(server) = read("VT_INFLUX_SERVER") {
            self.sink.server = server;
        }
        if let Some(endpoint) = read("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.otlp_endpoint = Some(endpoint);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_identifier(&self.store.namespace) {
            return Err(ConfigError::Invalid(format!(
                "store.namespace `{}` must be a plain identifier (letters, digits, underscore)",
                self.store.namespace
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.correlation.lookback_secs <= 0 {
            return Err(ConfigError::Invalid(
                "correlation.lookback_secs must be greater than zero".to_string(),
            ));
        }
        if self.replay.seconds_back <= 0 {
            return Err(ConfigError::Invalid(
                "replay.seconds_back must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.store
            .database_url
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("store.database_url is required".to_string()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn is_valid_identifier(raw: &str) -> bool {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    raw.len() <= 48 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
