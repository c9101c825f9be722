use serde::{Deserialize, Serialize};

/// Opaque control payload destined for exactly one device.
///
/// The cloud side never interprets the payload; it is serialized as JSON and
/// written to the device transport unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectiveMessage(serde_json::Value);

impl DirectiveMessage {
    pub fn new(payload: serde_json::Value) -> Self {
        Self(payload)
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.0
    }

    /// Wire form written to the device
    pub fn to_wire(&self) -> String {
        self.0.to_string()
    }
}

impl From<serde_json::Value> for DirectiveMessage {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}
