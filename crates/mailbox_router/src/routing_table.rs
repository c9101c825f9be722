use crate::{RouteEntry, TableError};
use async_trait::async_trait;
use common::domain::DeviceId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Outcome of an ownership claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Granted,
    /// Someone else holds a live lease
    Held(RouteEntry),
}

/// Fleet-wide record of which node owns each device's mailbox.
///
/// Every entry is a lease: it disappears after the TTL unless renewed, so
/// devices owned by a crashed node become claimable again. All mutations
/// compare against the full entry, owner and generation, so a stale writer
/// can never remove a successor's claim.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RoutingTable: Send + Sync {
    /// Atomically create the entry if no live lease exists
    async fn claim(&self, device_id: &DeviceId, entry: &RouteEntry) -> Result<Claim, TableError>;

    async fn resolve(&self, device_id: &DeviceId) -> Result<Option<RouteEntry>, TableError>;

    /// Extend the lease; `false` when `entry` no longer owns the device
    async fn renew(&self, device_id: &DeviceId, entry: &RouteEntry) -> Result<bool, TableError>;

    /// Delete the entry if it is still `entry`; `true` when something was removed
    async fn release(&self, device_id: &DeviceId, entry: &RouteEntry) -> Result<bool, TableError>;

    /// Drop a lease whose owner could not be asked to give it up
    async fn force_release(
        &self,
        device_id: &DeviceId,
        stale: &RouteEntry,
    ) -> Result<bool, TableError> {
        warn!(device_id = %device_id, owner = %stale.owner, generation = %stale.generation, "force-releasing routing entry");
        self.release(device_id, stale).await
    }
}

struct Lease {
    entry: RouteEntry,
    expires_at: Instant,
}

/// Routing table shared by nodes living in one process
pub struct InMemoryRoutingTable {
    leases: DashMap<DeviceId, Lease>,
    ttl: Duration,
}

impl InMemoryRoutingTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.leases
            .iter()
            .filter(|lease| lease.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RoutingTable for InMemoryRoutingTable {
    async fn claim(&self, device_id: &DeviceId, entry: &RouteEntry) -> Result<Claim, TableError> {
        let now = Instant::now();
        let lease = Lease {
            entry: entry.clone(),
            expires_at: now + self.ttl,
        };

        match self.leases.entry(device_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    return Ok(Claim::Held(occupied.get().entry.clone()));
                }
                occupied.insert(lease);
                Ok(Claim::Granted)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(lease);
                Ok(Claim::Granted)
            }
        }
    }

    async fn resolve(&self, device_id: &DeviceId) -> Result<Option<RouteEntry>, TableError> {
        let now = Instant::now();
        if let Some(lease) = self.leases.get(device_id) {
            if lease.expires_at > now {
                return Ok(Some(lease.entry.clone()));
            }
        }
        self.leases
            .remove_if(device_id, |_, lease| lease.expires_at <= now);
        Ok(None)
    }

    async fn renew(&self, device_id: &DeviceId, entry: &RouteEntry) -> Result<bool, TableError> {
        let now = Instant::now();
        match self.leases.get_mut(device_id) {
            Some(mut lease) if lease.entry == *entry && lease.expires_at > now => {
                lease.expires_at = now + self.ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, device_id: &DeviceId, entry: &RouteEntry) -> Result<bool, TableError> {
        Ok(self
            .leases
            .remove_if(device_id, |_, lease| lease.entry == *entry)
            .is_some())
    }
}
