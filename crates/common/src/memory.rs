//! In-memory storage gateway implementations.
//!
//! Used by the `memory` storage backend for local development and by tests
//! that need to observe writes rather than mock them.

use crate::domain::{
    Device, DeviceId, DeviceRepository, DomainError, DomainResult, SampleRepository, SensorSample,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use tracing::debug;

/// In-memory implementation of DeviceRepository using DashMap
#[derive(Default)]
pub struct InMemoryDeviceRepository {
    devices: DashMap<DeviceId, Device>,
}

impl InMemoryDeviceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device record, failing if the identifier is taken
    pub fn register(&self, device_id: DeviceId, friendly_name: &str) -> DomainResult<Device> {
        let now = chrono::Utc::now();
        let device = Device {
            device_id: device_id.clone(),
            friendly_name: friendly_name.to_string(),
            descriptor: None,
            created_at: Some(now),
            updated_at: Some(now),
        };

        match self.devices.entry(device_id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(DomainError::DeviceAlreadyExists(entry.key().to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(device.clone());
                Ok(device)
            }
        }
    }

    pub fn count(&self) -> usize {
        self.devices.len()
    }
}

#[async_trait]
impl DeviceRepository for InMemoryDeviceRepository {
    async fn get_device(&self, device_id: &DeviceId) -> DomainResult<Option<Device>> {
        Ok(self.devices.get(device_id).map(|d| d.clone()))
    }

    async fn set_descriptor(
        &self,
        device_id: &DeviceId,
        descriptor: &serde_json::Value,
    ) -> DomainResult<()> {
        let mut device = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| DomainError::DeviceNotFound(device_id.to_string()))?;
        device.descriptor = Some(descriptor.clone());
        device.updated_at = Some(chrono::Utc::now());
        Ok(())
    }
}

/// In-memory, append-only sample log
#[derive(Default)]
pub struct InMemorySampleRepository {
    samples: Mutex<Vec<SensorSample>>,
}

impl InMemorySampleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all samples in insertion order
    pub fn samples(&self) -> Vec<SensorSample> {
        match self.samples.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Samples recorded for one device and sensor, in insertion order
    pub fn samples_for(&self, device_id: &DeviceId, sensor_name: &str) -> Vec<SensorSample> {
        self.samples()
            .into_iter()
            .filter(|s| &s.device_id == device_id && s.sensor_name == sensor_name)
            .collect()
    }
}

#[async_trait]
impl SampleRepository for InMemorySampleRepository {
    async fn insert_sample(&self, sample: &SensorSample) -> DomainResult<()> {
        let mut samples = self
            .samples
            .lock()
            .map_err(|_| DomainError::RepositoryError(anyhow::anyhow!("sample log poisoned")))?;
        samples.push(sample.clone());
        debug!(
            device_id = %sample.device_id,
            sensor = %sample.sensor_name,
            kind = %sample.value.kind(),
            "stored sample in memory"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TypedValue;
    use serde_json::json;

    fn device_id(raw: &str) -> DeviceId {
        DeviceId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_get_device() {
        let repo = InMemoryDeviceRepository::new();
        repo.register(device_id("D1"), "thermostat").unwrap();

        let device = repo.get_device(&device_id("D1")).await.unwrap().unwrap();
        assert_eq!(device.friendly_name, "thermostat");
        assert!(device.descriptor.is_none());
        assert!(repo.get_device(&device_id("D2")).await.unwrap().is_none());
    }

    #[test]
    fn test_register_duplicate_fails() {
        let repo = InMemoryDeviceRepository::new();
        repo.register(device_id("D1"), "a").unwrap();
        let result = repo.register(device_id("D1"), "b");
        assert!(matches!(result, Err(DomainError::DeviceAlreadyExists(_))));
        assert_eq!(repo.count(), 1);
    }

    #[tokio::test]
    async fn test_set_descriptor_updates_record() {
        let repo = InMemoryDeviceRepository::new();
        repo.register(device_id("D1"), "a").unwrap();

        let descriptor = json!({"temp": {"type": "float"}});
        repo.set_descriptor(&device_id("D1"), &descriptor)
            .await
            .unwrap();

        let device = repo.get_device(&device_id("D1")).await.unwrap().unwrap();
        assert_eq!(device.descriptor, Some(descriptor));
    }

    #[tokio::test]
    async fn test_set_descriptor_unknown_device() {
        let repo = InMemoryDeviceRepository::new();
        let result = repo.set_descriptor(&device_id("nope"), &json!({})).await;
        assert!(matches!(result, Err(DomainError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_samples_preserve_insertion_order() {
        let repo = InMemorySampleRepository::new();
        for i in 0..3 {
            repo.insert_sample(&SensorSample {
                device_id: device_id("D1"),
                sensor_name: "temp".to_string(),
                recorded_at: chrono::Utc::now(),
                value: TypedValue::Int(i),
            })
            .await
            .unwrap();
        }

        let values: Vec<TypedValue> = repo
            .samples_for(&device_id("D1"), "temp")
            .into_iter()
            .map(|s| s.value)
            .collect();
        assert_eq!(
            values,
            vec![TypedValue::Int(0), TypedValue::Int(1), TypedValue::Int(2)]
        );
    }
}
