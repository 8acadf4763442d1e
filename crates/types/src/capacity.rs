//! Self-reported node capacity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Capacity fields carried by a node announcement.
///
/// Nodes announce whatever fields their service cares about
/// (`available_memory`, `available_storage`, `available_capacity`, ...).
/// Non-numeric fields are kept so service-specific scorers can still
/// read them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capacity(pub Map<String, Value>);

impl Capacity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a numeric field, returning the updated capacity.
    pub fn with(mut self, field: &str, value: f64) -> Self {
        self.0.insert(field.to_string(), Value::from(value));
        self
    }

    /// Read a field as a number. Missing or non-numeric fields yield `None`.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
