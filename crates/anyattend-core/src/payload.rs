//! Command payload values.
//!
//! Payloads are ordered maps of string keys to a small closed set of value
//! kinds. Keys are kept sorted (`BTreeMap`), so the same logical payload
//! always serializes to the same bytes. Arrays are not part of the value
//! set and are rejected on input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A command payload: sorted string keys to [`PayloadValue`]s.
pub type Payload = BTreeMap<String, PayloadValue>;

/// A single payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Map(Payload),
}

impl PayloadValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<Payload> for PayloadValue {
    fn from(value: Payload) -> Self {
        Self::Map(value)
    }
}

impl TryFrom<serde_json::Value> for PayloadValue {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(b)),
            serde_json::Value::Number(n) => Ok(Self::Number(n)),
            serde_json::Value::String(s) => Ok(Self::String(s)),
            serde_json::Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| Ok((k, Self::try_from(v)?)))
                .collect::<Result<Payload>>()
                .map(Self::Map),
            serde_json::Value::Array(_) => Err(Error::Payload(
                "arrays are not supported in command payloads".to_string(),
            )),
        }
    }
}

/// Parse a JSON object into a [`Payload`].
///
/// The top level must be an object; nested arrays are rejected.
pub fn parse_payload(json: &str) -> Result<Payload> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    payload_from_json(value)
}

/// Convert an already-parsed JSON value into a [`Payload`].
pub fn payload_from_json(value: serde_json::Value) -> Result<Payload> {
    match PayloadValue::try_from(value)? {
        PayloadValue::Map(map) => Ok(map),
        _ => Err(Error::Payload("payload must be a JSON object".to_string())),
    }
}
