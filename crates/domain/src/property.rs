//! Property values: the scalar state a Web Thing exposes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PropertyValueError;

/// A single property value as carried by the Web Thing protocol.
///
/// JSON numbers are always held as `f64`, so `1` and `1.0` compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    String(String),
}

/// Property name to value. Ordering is irrelevant to the protocol; a sorted
/// map keeps logs and notifications deterministic.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

impl PropertyValue {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Encode as a plain JSON scalar.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(value) => serde_json::Value::Bool(*value),
            Self::Number(value) => serde_json::Number::from_f64(*value)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(value) => serde_json::Value::String(value.clone()),
        }
    }
}

impl TryFrom<serde_json::Value> for PropertyValue {
    type Error = PropertyValueError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Bool(v) => Ok(Self::Bool(v)),
            serde_json::Value::Number(v) => v
                .as_f64()
                .map(Self::Number)
                .ok_or(PropertyValueError::Unsupported("number")),
            serde_json::Value::String(v) => Ok(Self::String(v)),
            serde_json::Value::Null => Err(PropertyValueError::Unsupported("null")),
            serde_json::Value::Array(_) => Err(PropertyValueError::Unsupported("array")),
            serde_json::Value::Object(_) => Err(PropertyValueError::Unsupported("object")),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
        }
    }
}

/// Convert a JSON object into a [`PropertyMap`], dropping entries whose
/// value is not a supported scalar (objects, arrays, `null`).
#[must_use]
pub fn properties_from_json(object: serde_json::Map<String, serde_json::Value>) -> PropertyMap {
    object
        .into_iter()
        .filter_map(|(name, value)| PropertyValue::try_from(value).ok().map(|v| (name, v)))
        .collect()
}

/// Entries of `incoming` that are absent from `current` or carry a
/// different value.
#[must_use]
pub fn changed_entries(current: &PropertyMap, incoming: &PropertyMap) -> PropertyMap {
    incoming
        .iter()
        .filter(|(name, value)| current.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
