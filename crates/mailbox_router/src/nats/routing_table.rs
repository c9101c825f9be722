use crate::{Claim, RouteEntry, RoutingTable, TableError};
use async_nats::jetstream::kv::{self, CreateErrorKind, Operation};
use async_trait::async_trait;
use bytes::Bytes;
use common::domain::DeviceId;
use tracing::debug;

/// Routing table stored in a JetStream key-value bucket.
///
/// The bucket's `max_age` is the lease TTL; a renewal rewrites the entry,
/// which restarts its age. Compare-and-set on the entry revision keeps every
/// mutation conditional on the entry the caller last saw.
pub struct NatsRoutingTable {
    store: kv::Store,
}

impl NatsRoutingTable {
    pub fn new(store: kv::Store) -> Self {
        Self { store }
    }

    fn encode(entry: &RouteEntry) -> Result<Bytes, TableError> {
        serde_json::to_vec(entry)
            .map(Bytes::from)
            .map_err(|e| TableError::Backend(format!("failed to encode entry: {}", e)))
    }

    /// Current live entry and its revision
    async fn current(&self, device_id: &DeviceId) -> Result<Option<(RouteEntry, u64)>, TableError> {
        let entry = self
            .store
            .entry(device_id.as_str())
            .await
            .map_err(|e| TableError::Backend(e.to_string()))?;

        match entry {
            Some(entry) if entry.operation == Operation::Put => {
                let route: RouteEntry =
                    serde_json::from_slice(&entry.value).map_err(|e| TableError::Corrupt {
                        key: entry.key.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(Some((route, entry.revision)))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl RoutingTable for NatsRoutingTable {
    async fn claim(&self, device_id: &DeviceId, entry: &RouteEntry) -> Result<Claim, TableError> {
        let value = Self::encode(entry)?;
        match self.store.create(device_id.as_str(), value).await {
            Ok(revision) => {
                debug!(device_id = %device_id, revision, "claimed routing entry");
                Ok(Claim::Granted)
            }
            Err(e) if e.kind() == CreateErrorKind::AlreadyExists => {
                match self.current(device_id).await? {
                    Some((holder, _)) => Ok(Claim::Held(holder)),
                    // deleted between our create and read; the caller retries
                    None => Err(TableError::Backend(format!(
                        "entry for {} changed during claim",
                        device_id
                    ))),
                }
            }
            Err(e) => Err(TableError::Backend(e.to_string())),
        }
    }

    async fn resolve(&self, device_id: &DeviceId) -> Result<Option<RouteEntry>, TableError> {
        Ok(self.current(device_id).await?.map(|(route, _)| route))
    }

    async fn renew(&self, device_id: &DeviceId, entry: &RouteEntry) -> Result<bool, TableError> {
        let Some((current, revision)) = self.current(device_id).await? else {
            return Ok(false);
        };
        if current != *entry {
            return Ok(false);
        }
        match self
            .store
            .update(device_id.as_str(), Self::encode(entry)?, revision)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!(device_id = %device_id, error = %e, "lease renewal lost a race");
                Ok(false)
            }
        }
    }

    async fn release(&self, device_id: &DeviceId, entry: &RouteEntry) -> Result<bool, TableError> {
        let Some((current, revision)) = self.current(device_id).await? else {
            return Ok(false);
        };
        if current != *entry {
            return Ok(false);
        }
        match self
            .store
            .delete_expect_revision(device_id.as_str(), Some(revision))
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(device_id = %device_id, error = %e, "release lost a race");
                Ok(false)
            }
        }
    }
}
