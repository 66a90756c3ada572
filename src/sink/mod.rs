pub mod influx;

use crate::config::{Config, FailurePolicy};
use crate::error::SinkError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Numeric JSON values only; strings, bools and nulls yield `None`.
    pub fn number(value: &Value) -> Option<Self> {
        if let Some(int) = value.as_i64() {
            return Some(FieldValue::Integer(int));
        }
        value
            .as_f64()
            .filter(|float| float.is_finite())
            .map(FieldValue::Float)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(int) => Some(*int as f64),
            FieldValue::Float(float) => Some(*float),
            FieldValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(int) => write!(f, "{}", int),
            FieldValue::Float(float) => write!(f, "{}", float),
            FieldValue::Text(text) => {
                write!(f, "\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
            }
        }
    }
}

/// One time-series sample: `measurement,entity=..,vin=.. value=.. <ms>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: &'static str,
    pub entity: &'static str,
    pub vin: String,
    pub value: FieldValue,
    pub timestamp_ms: i64,
}

impl Point {
    pub fn new(
        measurement: &'static str,
        entity: &'static str,
        vin: impl Into<String>,
        value: FieldValue,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            measurement,
            entity,
            vin: vin.into(),
            value,
            timestamp_ms,
        }
    }

    // Integers are written without the `i` suffix so a field keeps one
    // (float) type whichever JSON number shape the source produced.
    pub fn to_line_protocol(&self) -> String {
        format!(
            "{},entity={},vin={} value={} {}",
            escape_measurement(self.measurement),
            escape_tag(self.entity),
            escape_tag(&self.vin),
            self.value,
            self.timestamp_ms
        )
    }
}

fn escape_measurement(raw: &str) -> String {
    raw.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(raw: &str) -> String {
    raw.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn write_point(&self, point: &Point) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteTally {
    pub written: usize,
    pub dropped: usize,
    pub skipped: usize,
}

impl WriteTally {
    pub fn absorb(&mut self, other: WriteTally) {
        self.written += other.written;
        self.dropped += other.dropped;
        self.skipped += other.skipped;
    }
}

/// Applies the `write_to_sink` toggle and the failure policy in front of a
/// [`MetricSink`].
#[derive(Clone)]
pub struct PointWriter {
    sink: Arc<dyn MetricSink>,
    enabled: bool,
    policy: FailurePolicy,
}

impl PointWriter {
    pub fn new(sink: Arc<dyn MetricSink>, enabled: bool, policy: FailurePolicy) -> Self {
        Self {
            sink,
            enabled,
            policy,
        }
    }

    pub fn from_config(sink: Arc<dyn MetricSink>, config: &Config) -> Self {
        Self::new(sink, config.write_to_sink, config.failure_policy)
    }

    pub async fn write(&self, point: &Point) -> Result<WriteTally, SinkError> {
        if !self.enabled {
            tracing::debug!(line=%point.to_line_protocol(), "writing to the metrics sink is disabled");
            return Ok(WriteTally {
                skipped: 1,
                ..WriteTally::default()
            });
        }

        match self.sink.write_point(point).await {
            Ok(()) => {
                tracing::debug!(line=%point.to_line_protocol(), "wrote point");
                Ok(WriteTally {
                    written: 1,
                    ..WriteTally::default()
                })
            }
            Err(err) if self.policy.is_fail_open() => {
                tracing::error!(
                    error=%err,
                    measurement=point.measurement,
                    entity=point.entity,
                    vin=%point.vin,
                    "dropping point"
                );
                Ok(WriteTally {
                    dropped: 1,
                    ..WriteTally::default()
                })
            }
            Err(err) => Err(err),
        }
    }

    pub async fn write_all(&self, points: &[Point]) -> Result<WriteTally, SinkError> {
        let mut tally = WriteTally::default();
        for point in points {
            tally.absorb(self.write(point).await?);
        }
        Ok(tally)
    }
}
