//! WorkflowState - the schemaless key/value document describing project progress.
//!
//! Consumers read keys defensively: every accessor returns an `Option` and a
//! missing or mistyped key is never an error on its own.

mod file_manager;

pub use file_manager::{DEFAULT_STATE_FILE, FileStateManager};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::StateError;

/// Key of the optional project layout sub-mapping checked by the constraint engine.
pub const PROJECT_STRUCTURE_KEY: &str = "project_structure";

/// An unordered mapping from string keys to JSON-representable values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowState(Map<String, Value>);

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from an arbitrary JSON value. Only objects are states.
    pub fn from_value(value: Value) -> Result<Self, StateError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(StateError::Unsupported(format!(
                "workflow state must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.0.get(key).and_then(Value::as_object)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert any serializable value.
    ///
    /// Values JSON cannot represent fail the insert instead of being dropped:
    /// maps with non-string keys, and NaN or infinite floats (which
    /// serde_json would otherwise store as `null`).
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<(), StateError> {
        let key = key.into();
        let json = serde_json::to_value(&value)
            .map_err(|e| StateError::Unsupported(format!("value for key '{}': {}", key, e)))?;

        // A null may be a genuine `None` or a non-finite float; serde_yaml keeps
        // the float, so re-serialize only when there is a null to explain.
        if contains_null(&json)
            && serde_yaml::to_value(&value).is_ok_and(|yaml| contains_non_finite(&yaml))
        {
            return Err(StateError::Unsupported(format!(
                "value for key '{}': NaN and infinite numbers are not representable",
                key
            )));
        }

        self.0.insert(key, json);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize as pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, StateError> {
        serde_json::to_string_pretty(&self.0)
            .map_err(|e| StateError::Unsupported(e.to_string()))
    }
}

impl From<Map<String, Value>> for WorkflowState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for WorkflowState {
    type Error = StateError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

fn contains_null(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.iter().any(contains_null),
        Value::Object(map) => map.values().any(contains_null),
        _ => false,
    }
}

fn contains_non_finite(value: &serde_yaml::Value) -> bool {
    match value {
        serde_yaml::Value::Number(n) => n.is_nan() || n.is_infinite(),
        serde_yaml::Value::Sequence(items) => items.iter().any(contains_non_finite),
        serde_yaml::Value::Mapping(map) => map
            .iter()
            .any(|(k, v)| contains_non_finite(k) || contains_non_finite(v)),
        serde_yaml::Value::Tagged(tagged) => contains_non_finite(&tagged.value),
        _ => false,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
