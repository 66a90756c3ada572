use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("invalid timestamp arguments: {0}")]
    InvalidArguments(&'static str),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("change feed closed")]
    FeedClosed,
    #[error("change feed listener failed: {0}")]
    FeedBroken(#[source] sqlx::Error),
}

impl StoreError {
    /// Whether the insert feed itself is gone, as opposed to one event
    /// that could not be read.
    pub fn ends_feed(&self) -> bool {
        matches!(self, StoreError::FeedClosed | StoreError::FeedBroken(_))
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("start timestamp {start_ms} must not be after end timestamp {end_ms}")]
    InvalidRange { start_ms: i64, end_ms: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("metrics sink {server} returned HTTP {status}")]
    Status { server: String, status: u16 },
    #[error("could not reach metrics sink {server}: {source}")]
    Transport {
        server: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("metrics sink rejected point: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("not connected to the broker")]
    Disconnected,
    #[error(transparent)]
    Client(#[from] rumqttc::ClientError),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("telemetry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telemetry api returned HTTP {0}")]
    Status(u16),
    #[error("could not decode telemetry response: {0}")]
    Decode(String),
    #[error("vehicle with vin {0} not found on the account")]
    VehicleNotFound(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find a configuration file (searched {searched:?})")]
    NotFound { searched: Vec<PathBuf> },
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, Error)]
pub enum DumpError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}
