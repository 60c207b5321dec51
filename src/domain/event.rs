//! Externally-produced change events.
//!
//! The relay has no schema for events: anything that parses as JSON is
//! accepted and forwarded verbatim to every subscriber.

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Opaque event payload describing "what changed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(serde_json::Value);

impl Event {
    /// Wraps an already-parsed JSON value.
    #[must_use]
    pub const fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Parses a request body into an event.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedEvent`] if `bytes` is not valid JSON.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(|e| RelayError::MalformedEvent(e.to_string()))
    }

    /// Returns the underlying JSON value.
    #[must_use]
    pub const fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// The `type` field of an object payload, if any. Used for logging.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(serde_json::Value::as_str)
    }

    /// Encodes the event as a single text frame.
    ///
    /// A JSON string payload is forwarded as its raw contents; every other
    /// value is sent in compact serialized form.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Serialization`] if the value cannot be encoded.
    pub fn to_frame(&self) -> Result<Utf8Bytes, RelayError> {
        match &self.0 {
            serde_json::Value::String(raw) => Ok(Utf8Bytes::from(raw.clone())),
            value => Ok(Utf8Bytes::from(serde_json::to_string(value)?)),
        }
    }
}

impl From<serde_json::Value> for Event {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}
