use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const FIELD_VIN: &str = "vin";
pub const FIELD_TIMESTAMP: &str = "timestamp";
const INTERNAL_ID: &str = "_id";

/// One raw snapshot of a telemetry endpoint, kept as the JSON object the
/// source produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Only JSON objects are documents.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn vin(&self) -> Option<&str> {
        self.str_field(FIELD_VIN)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        let value = self.0.get(FIELD_TIMESTAMP)?;
        value
            .as_i64()
            .or_else(|| value.as_u64().and_then(|v| i64::try_from(v).ok()))
            .or_else(|| value.as_f64().filter(|v| v.is_finite()).map(|v| v as i64))
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// `true` for a boolean `true` or a non-zero number.
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(number)) => number.as_f64().map(|v| v != 0.0).unwrap_or(false),
            _ => false,
        }
    }

    pub fn strip_internal_ids(&mut self) {
        self.0.remove(INTERNAL_ID);
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}
