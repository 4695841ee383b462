use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::{ValidationError, ValidationResult};

/// Request body sent to an analysis provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest {
    /// Opaque identifier, fresh for every call
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Named provider inputs (`in-0`, `in-1`, ...)
    #[serde(flatten)]
    pub inputs: BTreeMap<String, String>,
}

impl ProviderRequest {
    /// Create a request with no inputs
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            inputs: BTreeMap::new(),
        }
    }

    /// Add a named input
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }
}

/// One entry of the provider's `outputs` map.
///
/// Providers send some outputs as JSON-encoded strings and others as
/// already-decoded values; both forms are accepted for every key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    Encoded(String),
    Decoded(Value),
}

impl OutputValue {
    fn is_empty(&self) -> bool {
        match self {
            OutputValue::Encoded(s) => s.trim().is_empty(),
            OutputValue::Decoded(v) => v.is_null(),
        }
    }

    /// Decode into a JSON value. A string that is not valid JSON is a
    /// validation failure.
    pub fn decode(&self, key: &str) -> ValidationResult<Value> {
        match self {
            OutputValue::Encoded(s) => serde_json::from_str(s).map_err(|e| {
                ValidationError::new(
                    format!("outputs.{}", key),
                    format!("Output {} is not valid JSON: {}", key, e),
                )
            }),
            OutputValue::Decoded(v) => Ok(v.clone()),
        }
    }

    /// The output as text: strings verbatim, values re-serialized.
    pub fn as_text(&self) -> String {
        match self {
            OutputValue::Encoded(s) => s.clone(),
            OutputValue::Decoded(v) => v.to_string(),
        }
    }
}

/// Response envelope returned by every provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEnvelope {
    pub outputs: HashMap<String, OutputValue>,
    /// The body exactly as received
    #[serde(skip)]
    pub raw: Value,
}

impl ProviderEnvelope {
    /// Parse an envelope from a response body, keeping the raw body.
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        let mut envelope: ProviderEnvelope = serde_json::from_value(raw.clone())?;
        envelope.raw = raw;
        Ok(envelope)
    }

    /// A mandatory output; empty strings and nulls count as missing.
    pub fn output(&self, key: &str) -> ValidationResult<&OutputValue> {
        self.outputs
            .get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ValidationError::missing(format!("outputs.{}", key)))
    }

    /// A mandatory output, decoded to JSON.
    pub fn decoded(&self, key: &str) -> ValidationResult<Value> {
        self.output(key)?.decode(key)
    }
}
