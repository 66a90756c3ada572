//! Vehicle poller: snapshots the telemetry API into the document store.
//!
//! Every tick stores the vehicle summary. An online vehicle has all its
//! endpoints stored as well, unless it was recently marked sleepy; then the
//! poller holds off so the car is allowed to fall asleep.

use crate::config::{Config, FailurePolicy};
use crate::document::{Document, FIELD_TIMESTAMP, FIELD_VIN};
use crate::error::{ConfigError, StoreError};
use crate::mapper::MILES_TO_KM;
use crate::source::{vehicle_id, VehicleApi};
use crate::store::{write_document, DocumentStore};
use crate::timestamp;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How long an idle marker keeps the poller from touching the endpoints.
pub const SLEEPY_HOLD_SECS: i64 = 3600;
/// Extra wait after writing an idle marker.
pub const SLEEPY_SETTLE_SECS: u64 = 1200;

pub const POLLED_ENDPOINTS: [&str; 6] = [
    "charge_state",
    "climate_state",
    "drive_state",
    "gui_settings",
    "vehicle_state",
    "vehicle_config",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    SourceUnavailable,
    Holding { sleepy_for_secs: i64 },
    HoldReleased,
    Polled {
        stored: usize,
        failed: usize,
        sleepy: bool,
    },
    NotOnline { state: String },
}

impl TickOutcome {
    pub fn next_delay(&self, poll_interval: Duration) -> Duration {
        match self {
            TickOutcome::Polled { sleepy: true, .. } => {
                poll_interval + Duration::from_secs(SLEEPY_SETTLE_SECS)
            }
            _ => poll_interval,
        }
    }
}

/// `ideal_battery_range` in km scaled up to a full battery.
pub fn est_ideal_maxrange(charge_state: &Document) -> Option<f64> {
    let ideal = charge_state.get("ideal_battery_range")?.as_f64()?;
    let level = charge_state.get("battery_level")?.as_f64()?;
    if level == 0.0 {
        return None;
    }
    Some(ideal * MILES_TO_KM / level * 100.0)
}

/// A vehicle wants to sleep when it is parked and not charging.
pub fn is_sleepy(drive_state: &Document, charge_state: &Document) -> bool {
    matches!(drive_state.get("shift_state"), Some(Value::Null))
        && charge_state.str_field("charging_state") != Some("Charging")
}

pub struct Poller {
    api: Arc<dyn VehicleApi>,
    store: Arc<dyn DocumentStore>,
    vin: String,
    write_to_store: bool,
    policy: FailurePolicy,
    last_sleepy_at: Option<i64>,
}

impl Poller {
    pub fn new(
        api: Arc<dyn VehicleApi>,
        store: Arc<dyn DocumentStore>,
        vin: impl Into<String>,
        write_to_store: bool,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            api,
            store,
            vin: vin.into(),
            write_to_store,
            policy,
            last_sleepy_at: None,
        }
    }

    pub fn from_config(
        api: Arc<dyn VehicleApi>,
        store: Arc<dyn DocumentStore>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        let vin = config
            .vin
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("vin is required for polling".to_string()))?;
        Ok(Self::new(
            api,
            store,
            vin,
            config.write_to_store,
            config.failure_policy,
        ))
    }

    pub fn last_sleepy_at(&self) -> Option<i64> {
        self.last_sleepy_at
    }

    async fn persist(&self, collection: &str, document: &Document) -> Result<(), StoreError> {
        write_document(
            self.store.as_ref(),
            self.write_to_store,
            self.policy,
            collection,
            document,
        )
        .await?;
        Ok(())
    }

    pub async fn tick(&mut self, now_ms: i64) -> Result<TickOutcome, StoreError> {
        let mut summary = match self.api.vehicle(&self.vin).await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(error=%err, vin=%self.vin, "could not get vehicle from the telemetry api");
                return Ok(TickOutcome::SourceUnavailable);
            }
        };
        summary.insert(FIELD_TIMESTAMP, now_ms);
        self.persist("vehicle", &summary).await?;

        let state = summary.str_field("state").unwrap_or_default().to_string();
        if state != "online" {
            if matches!(state.as_str(), "offline" | "asleep" | "waking") {
                tracing::info!(vin=%self.vin, state=%state, "vehicle is not online");
            } else {
                tracing::warn!(vin=%self.vin, state=%state, "vehicle has an unknown state");
            }
            self.last_sleepy_at = None;
            return Ok(TickOutcome::NotOnline { state });
        }

        if let Some(since) = self.last_sleepy_at {
            let sleepy_for_secs = (now_ms - since) / 1000;
            if sleepy_for_secs < SLEEPY_HOLD_SECS {
                tracing::info!(vin=%self.vin, minutes = sleepy_for_secs / 60, "vehicle is sleepy but still online");
                return Ok(TickOutcome::Holding { sleepy_for_secs });
            }
            tracing::info!(vin=%self.vin, "sleepy hold expired; polling again next tick");
            self.last_sleepy_at = None;
            return Ok(TickOutcome::HoldReleased);
        }

        let Some(id) = vehicle_id(&summary) else {
            tracing::warn!(vin=%self.vin, "vehicle summary has no id");
            return Ok(TickOutcome::SourceUnavailable);
        };
        self.poll_endpoints(id, now_ms).await
    }

    async fn poll_endpoints(&mut self, id: i64, now_ms: i64) -> Result<TickOutcome, StoreError> {
        let mut snapshots: HashMap<&str, Document> = HashMap::new();
        let mut failed = 0;
        for endpoint in POLLED_ENDPOINTS {
            match self.api.endpoint(id, endpoint).await {
                Ok(mut data) => {
                    data.insert(FIELD_VIN, self.vin.clone());
                    data.insert(FIELD_TIMESTAMP, now_ms);
                    self.persist(endpoint, &data).await?;
                    snapshots.insert(endpoint, data);
                }
                Err(err) => {
                    tracing::warn!(error=%err, vin=%self.vin, endpoint, "could not get endpoint data");
                    failed += 1;
                }
            }
        }

        let charge_state = snapshots.get("charge_state");
        if let Some(maxrange) = charge_state.and_then(est_ideal_maxrange) {
            let mut derived = self.custom_data(now_ms);
            derived.insert("est_ideal_maxrange", maxrange);
            self.persist("custom_data", &derived).await?;
        }

        let sleepy = match (snapshots.get("drive_state"), charge_state) {
            (Some(drive_state), Some(charge_state)) => is_sleepy(drive_state, charge_state),
            _ => false,
        };
        if sleepy {
            tracing::info!(vin=%self.vin, "vehicle is sleepy");
            let mut marker = self.custom_data(now_ms);
            marker.insert("sleepy", true);
            self.persist("custom_data", &marker).await?;
            self.last_sleepy_at = Some(now_ms);
        }

        Ok(TickOutcome::Polled {
            stored: snapshots.len(),
            failed,
            sleepy,
        })
    }

    fn custom_data(&self, now_ms: i64) -> Document {
        let mut document = Document::new();
        document.insert(FIELD_TIMESTAMP, now_ms);
        document.insert(FIELD_VIN, self.vin.clone());
        document
    }

    /// Ticks until a store write fails under `FailFast`.
    pub async fn run(&mut self, poll_interval: Duration) -> Result<(), StoreError> {
        loop {
            let outcome = self.tick(timestamp::now_ms()).await?;
            tracing::debug!(outcome = ?outcome, "poll tick");
            tokio::time::sleep(outcome.next_delay(poll_interval)).await;
        }
    }
}
