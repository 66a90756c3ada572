//! Sleep latency: how long a vehicle takes to fall asleep after the poller
//! backed off.
//!
//! Every idle marker (`custom_data` with `sleepy`) in the lookback window is
//! paired with the first `vehicle` document reporting `asleep` within the
//! following hour, and the elapsed seconds are written as
//! `custom_data,entity=sleepy_to_sleep`.

use crate::config::CorrelationConfig;
use crate::document::Document;
use crate::error::QueryError;
use crate::query::WindowQuery;
use crate::sink::{FieldValue, Point, PointWriter, WriteTally};
use crate::timestamp;
use serde::Deserialize;

pub const DEFAULT_LOOKBACK_SECS: i64 = 7200;
/// How long after a marker a sleep transition still counts.
pub const FOLLOW_WINDOW_MS: i64 = 3_600_000;

const MARKER_COLLECTION: &str = "custom_data";
const TRANSITION_COLLECTION: &str = "vehicle";
const ASLEEP: &str = "asleep";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VinMatching {
    /// Only transitions of the marker's own vehicle qualify.
    #[default]
    SameVehicle,
    /// Any vehicle's transition qualifies.
    AnyVehicle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorSettings {
    pub lookback_secs: i64,
    pub vin_matching: VinMatching,
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self {
            lookback_secs: DEFAULT_LOOKBACK_SECS,
            vin_matching: VinMatching::default(),
        }
    }
}

impl From<&CorrelationConfig> for CorrelatorSettings {
    fn from(config: &CorrelationConfig) -> Self {
        Self {
            lookback_secs: config.lookback_secs,
            vin_matching: config.vin_matching,
        }
    }
}

/// An idle marker with the fields correlation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub vin: Option<String>,
    pub timestamp_ms: i64,
}

impl Marker {
    pub fn from_document(document: &Document) -> Option<Self> {
        if !document.flag("sleepy") {
            return None;
        }
        Some(Self {
            vin: document.vin().map(str::to_string),
            timestamp_ms: document.timestamp_ms()?,
        })
    }

    pub fn follow_end_ms(&self) -> i64 {
        self.timestamp_ms.saturating_add(FOLLOW_WINDOW_MS)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedSample {
    pub vin: String,
    pub latency_secs: f64,
    pub timestamp_ms: i64,
}

impl CorrelatedSample {
    pub fn to_point(&self) -> Point {
        Point::new(
            "custom_data",
            "sleepy_to_sleep",
            self.vin.clone(),
            FieldValue::Float(self.latency_secs),
            self.timestamp_ms,
        )
    }
}

/// Scans `candidates` in the order given and returns the first qualifying
/// sleep transition. Candidates without `state`, `timestamp` or `vin` never
/// qualify.
pub fn first_sleep_transition(
    marker: &Marker,
    candidates: &[Document],
    matching: VinMatching,
) -> Option<CorrelatedSample> {
    candidates.iter().find_map(|candidate| {
        if candidate.str_field("state") != Some(ASLEEP) {
            return None;
        }
        let vin = candidate.vin()?;
        let timestamp_ms = candidate.timestamp_ms()?;
        if matching == VinMatching::SameVehicle && marker.vin.as_deref() != Some(vin) {
            return None;
        }
        Some(CorrelatedSample {
            vin: vin.to_string(),
            latency_secs: (timestamp_ms - marker.timestamp_ms) as f64 / 1000.0,
            timestamp_ms,
        })
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationReport {
    pub markers_seen: usize,
    pub markers_skipped: usize,
    pub markers_faulted: usize,
    pub samples_emitted: usize,
    pub points: WriteTally,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SleepCorrelator {
    settings: CorrelatorSettings,
}

impl SleepCorrelator {
    pub fn new(settings: CorrelatorSettings) -> Self {
        Self { settings }
    }

    /// Only the marker lookup can fail the run; candidate faults and sink
    /// faults are contained to their marker.
    pub async fn run(
        &self,
        query: WindowQuery<'_>,
        writer: &PointWriter,
        now_ms: i64,
    ) -> Result<CorrelationReport, QueryError> {
        let window_start = timestamp::shift(now_ms, -self.settings.lookback_secs);
        let documents = query
            .fetch_range(MARKER_COLLECTION, window_start, now_ms)
            .await?;

        let mut report = CorrelationReport::default();
        for document in documents.iter().filter(|document| document.flag("sleepy")) {
            report.markers_seen += 1;

            let marker = match Marker::from_document(document) {
                Some(marker)
                    if marker.vin.is_some()
                        || self.settings.vin_matching == VinMatching::AnyVehicle =>
                {
                    marker
                }
                _ => {
                    tracing::debug!(document = ?document, "skipping idle marker without vin or timestamp");
                    report.markers_skipped += 1;
                    continue;
                }
            };

            let candidates = match query
                .fetch_range(
                    TRANSITION_COLLECTION,
                    marker.timestamp_ms,
                    marker.follow_end_ms(),
                )
                .await
            {
                Ok(candidates) => candidates,
                Err(err) => {
                    tracing::error!(error=%err, marker_ms = marker.timestamp_ms, "could not load sleep candidates");
                    report.markers_faulted += 1;
                    continue;
                }
            };

            let Some(sample) =
                first_sleep_transition(&marker, &candidates, self.settings.vin_matching)
            else {
                tracing::debug!(
                    vin = ?marker.vin,
                    since = %timestamp::format_ms(marker.timestamp_ms),
                    "no sleep transition within the follow window"
                );
                continue;
            };

            tracing::info!(
                vin=%sample.vin,
                latency_secs = sample.latency_secs,
                asleep_at = %timestamp::format_ms(sample.timestamp_ms),
                "sleepy to sleep"
            );
            report.samples_emitted += 1;
            match writer.write(&sample.to_point()).await {
                Ok(tally) => report.points.absorb(tally),
                Err(err) => {
                    tracing::error!(error=%err, vin=%sample.vin, "failed to write sleep latency");
                    report.points.dropped += 1;
                }
            }
        }

        Ok(report)
    }
}
