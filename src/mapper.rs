//! Turns raw telemetry documents into time-series points.
//!
//! Each known collection has a fixed emission table; the collection name is
//! parsed into [`Collection`] up front so unknown names are reported instead
//! of silently ignored.

use crate::document::Document;
use crate::sink::{FieldValue, Point};
use serde::Deserialize;
use serde_json::Value;

pub const MILES_TO_KM: f64 = 1.609344;

/// How `vehicle` documents are written to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStrategy {
    /// `vehicle_state,entity=sleeping` as 1 when asleep, else 0.
    #[default]
    SleepingFlag,
    /// `vehicle_state_txt,entity=state` carrying the raw state string.
    TextState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    ChargeState,
    ClimateState,
    DriveState,
    VehicleState,
    Vehicle,
    CustomData,
    VehicleConfig,
    GuiSettings,
    MobileEnabled,
    NearbyChargingSites,
}

impl Collection {
    pub const ALL: [Collection; 10] = [
        Collection::ChargeState,
        Collection::ClimateState,
        Collection::DriveState,
        Collection::VehicleState,
        Collection::Vehicle,
        Collection::CustomData,
        Collection::VehicleConfig,
        Collection::GuiSettings,
        Collection::MobileEnabled,
        Collection::NearbyChargingSites,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|collection| collection.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Collection::ChargeState => "charge_state",
            Collection::ClimateState => "climate_state",
            Collection::DriveState => "drive_state",
            Collection::VehicleState => "vehicle_state",
            Collection::Vehicle => "vehicle",
            Collection::CustomData => "custom_data",
            Collection::VehicleConfig => "vehicle_config",
            Collection::GuiSettings => "gui_settings",
            Collection::MobileEnabled => "mobile_enabled",
            Collection::NearbyChargingSites => "nearby_charging_sites",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFault {
    MissingVin,
    MissingTimestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    Points(Vec<Point>),
    Unrecognized,
    Rejected(DocumentFault),
}

struct Emitter<'a> {
    collection: Collection,
    document: &'a Document,
    vin: &'a str,
    timestamp_ms: i64,
    points: Vec<Point>,
}

impl<'a> Emitter<'a> {
    fn push(&mut self, measurement: &'static str, entity: &'static str, value: FieldValue) {
        self.points.push(Point::new(
            measurement,
            entity,
            self.vin,
            value,
            self.timestamp_ms,
        ));
    }

    /// Numeric field, `None` when absent, null or not a number.
    fn number(&self, key: &str) -> Option<FieldValue> {
        let value = self.document.get(key)?;
        let number = FieldValue::number(value);
        if number.is_none() && !value.is_null() {
            tracing::debug!(
                collection = self.collection.name(),
                field = key,
                value = %value,
                "skipping non-numeric field"
            );
        }
        number
    }

    fn raw(&mut self, measurement: &'static str, entity: &'static str) {
        if let Some(value) = self.number(entity) {
            self.push(measurement, entity, value);
        }
    }

    fn miles_to_km(&mut self, measurement: &'static str, entity: &'static str) {
        if let Some(miles) = self.number(entity).and_then(|value| value.as_f64()) {
            self.push(measurement, entity, FieldValue::Float(miles * MILES_TO_KM));
        }
    }

    /// Present-but-null reads as zero; an absent key emits nothing.
    fn zero_if_null(&mut self, measurement: &'static str, entity: &'static str) {
        match self.document.get(entity) {
            None => {}
            Some(Value::Null) => self.push(measurement, entity, FieldValue::Integer(0)),
            Some(_) => self.raw(measurement, entity),
        }
    }

    fn text(&mut self, measurement: &'static str, entity: &'static str) {
        if let Some(text) = self.document.str_field(entity) {
            let text = text.to_string();
            self.push(measurement, entity, FieldValue::Text(text));
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricMapper {
    strategy: VehicleStrategy,
}

impl MetricMapper {
    pub fn new(strategy: VehicleStrategy) -> Self {
        Self { strategy }
    }

    pub fn map(&self, collection: &str, document: &Document) -> MapOutcome {
        match Collection::from_name(collection) {
            Some(collection) => match self.map_collection(collection, document) {
                Ok(points) => MapOutcome::Points(points),
                Err(fault) => MapOutcome::Rejected(fault),
            },
            None => MapOutcome::Unrecognized,
        }
    }

    pub fn map_collection(
        &self,
        collection: Collection,
        document: &Document,
    ) -> Result<Vec<Point>, DocumentFault> {
        let vin = document.vin().ok_or(DocumentFault::MissingVin)?;
        let timestamp_ms = document
            .timestamp_ms()
            .ok_or(DocumentFault::MissingTimestamp)?;
        let mut emit = Emitter {
            collection,
            document,
            vin,
            timestamp_ms,
            points: Vec::new(),
        };

        match collection {
            Collection::ChargeState => {
                emit.raw("charge_state", "battery_level");
                emit.miles_to_km("charge_state", "ideal_battery_range");
                emit.miles_to_km("charge_state", "est_battery_range");
                emit.miles_to_km("charge_state", "battery_range");
            }
            Collection::ClimateState => {
                emit.raw("climate_state", "inside_temp");
                emit.raw("climate_state", "outside_temp");
            }
            Collection::DriveState => {
                emit.zero_if_null("drive_state", "power");
                emit.zero_if_null("drive_state", "speed");
                emit.text("drive_state_txt", "shift_state");
            }
            Collection::VehicleState => emit.raw("vehicle_state", "odometer"),
            Collection::Vehicle => match (self.strategy, document.str_field("state")) {
                (VehicleStrategy::SleepingFlag, Some(state)) => {
                    let sleeping = i64::from(state == "asleep");
                    emit.push("vehicle_state", "sleeping", FieldValue::Integer(sleeping));
                }
                (VehicleStrategy::TextState, Some(_)) => emit.text("vehicle_state_txt", "state"),
                (_, None) => {}
            },
            Collection::CustomData => {
                if document.flag("sleepy") {
                    emit.push("custom_data", "sleepy", FieldValue::Integer(1));
                }
                emit.raw("custom_data", "est_ideal_maxrange");
            }
            Collection::VehicleConfig
            | Collection::GuiSettings
            | Collection::MobileEnabled
            | Collection::NearbyChargingSites => {}
        }

        Ok(emit.points)
    }
}
