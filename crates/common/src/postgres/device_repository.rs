use crate::domain::{Device, DeviceId, DeviceRepository, DomainError, DomainResult};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

/// Device row for PostgreSQL storage with timestamp metadata
#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub device_id: String,
    pub friendly_name: String,
    pub sddl: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Convert database DeviceRow to domain Device
impl TryFrom<DeviceRow> for Device {
    type Error = DomainError;

    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        Ok(Device {
            device_id: DeviceId::parse(&row.device_id)?,
            friendly_name: row.friendly_name,
            descriptor: row.sddl,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        })
    }
}

/// PostgreSQL implementation of DeviceRepository trait
#[derive(Clone)]
pub struct PostgresDeviceRepository {
    client: PostgresClient,
}

impl PostgresDeviceRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeviceRepository for PostgresDeviceRepository {
    #[instrument(skip(self), fields(device_id = %device_id))]
    async fn get_device(&self, device_id: &DeviceId) -> DomainResult<Option<Device>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT device_id, friendly_name, sddl, created_at, updated_at
                 FROM devices
                 WHERE device_id = $1",
                &[&device_id.as_str()],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        match row {
            Some(row) => {
                let device_row = DeviceRow {
                    device_id: row.get(0),
                    friendly_name: row.get(1),
                    sddl: row.get(2),
                    created_at: row.get(3),
                    updated_at: row.get(4),
                };
                debug!("found device: {}", device_row.device_id);
                Ok(Some(device_row.try_into()?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, descriptor), fields(device_id = %device_id))]
    async fn set_descriptor(
        &self,
        device_id: &DeviceId,
        descriptor: &serde_json::Value,
    ) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let updated = conn
            .execute(
                "UPDATE devices SET sddl = $2, updated_at = $3 WHERE device_id = $1",
                &[&device_id.as_str(), descriptor, &Utc::now()],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        if updated == 0 {
            return Err(DomainError::DeviceNotFound(device_id.to_string()));
        }

        debug!("stored capability descriptor for device: {}", device_id);
        Ok(())
    }
}
