use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_DEVICE_ID_LEN: usize = 128;

/// Stable identifier naming one device across reconnects.
///
/// Identifiers are opaque (UUIDs in production, short names in tests) but are
/// restricted to `[A-Za-z0-9_-]` so they can be used verbatim as routing-table
/// keys and message subjects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        if raw.is_empty() {
            return Err(DomainError::InvalidDeviceId("device_id is empty".to_string()));
        }
        if raw.len() > MAX_DEVICE_ID_LEN {
            return Err(DomainError::InvalidDeviceId(format!(
                "device_id exceeds {} characters",
                MAX_DEVICE_ID_LEN
            )));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(DomainError::InvalidDeviceId(format!(
                "unexpected character {:?} in {}",
                c, raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// Device record as held by the storage gateway
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub device_id: DeviceId,
    pub friendly_name: String,
    /// Most recently declared capability descriptor, in its canonical JSON form
    pub descriptor: Option<serde_json::Value>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Repository trait for device records
/// Infrastructure layer (postgres, in-memory) implements this trait
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Look up a device by its identifier
    async fn get_device(&self, device_id: &DeviceId) -> DomainResult<Option<Device>>;

    /// Persist the capability descriptor most recently declared by the device
    async fn set_descriptor(
        &self,
        device_id: &DeviceId,
        descriptor: &serde_json::Value,
    ) -> DomainResult<()>;
}
