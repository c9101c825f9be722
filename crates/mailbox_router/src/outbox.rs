use crate::{
    FabricRequest, FabricResponse, FabricTransport, MailboxRegistry, NodeId, RouterError,
    RouterResult, RoutingTable,
};
use common::domain::{DeviceId, DirectiveMessage};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Successful delivery of a directive into the owning mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Local,
    Forwarded { node: NodeId },
}

/// Send side of the fabric: the only way the rest of the system reaches a
/// connected device.
///
/// Delivery is best-effort and at most once. Offline devices, stale routes
/// and unreachable nodes all surface as `Undeliverable`; nothing is queued
/// or retried here.
#[derive(Clone)]
pub struct Outbox {
    node_id: NodeId,
    registry: Arc<MailboxRegistry>,
    table: Arc<dyn RoutingTable>,
    fabric: Arc<dyn FabricTransport>,
}

impl Outbox {
    pub fn new(
        node_id: NodeId,
        registry: Arc<MailboxRegistry>,
        table: Arc<dyn RoutingTable>,
        fabric: Arc<dyn FabricTransport>,
    ) -> Self {
        Self {
            node_id,
            registry,
            table,
            fabric,
        }
    }

    #[instrument(skip(self, directive), fields(node_id = %self.node_id, device_id = %device_id))]
    pub async fn send(
        &self,
        device_id: &DeviceId,
        directive: DirectiveMessage,
    ) -> RouterResult<Ack> {
        let directive = match self.registry.deliver(device_id, directive) {
            Ok(()) => {
                debug!("directive delivered to local mailbox");
                return Ok(Ack::Local);
            }
            Err(directive) => directive,
        };

        let entry = self
            .table
            .resolve(device_id)
            .await
            .map_err(|e| RouterError::undeliverable(device_id, e.to_string()))?
            .ok_or_else(|| RouterError::undeliverable(device_id, "device is not connected"))?;

        if entry.owner == self.node_id {
            // table still names this node but the mailbox is already gone
            return Err(RouterError::undeliverable(
                device_id,
                "stale route to this node",
            ));
        }

        let request = FabricRequest::Forward {
            device_id: device_id.clone(),
            directive,
        };
        match self.fabric.request(&entry.owner, request).await {
            Ok(FabricResponse::Delivered) => {
                debug!(owner = %entry.owner, "directive forwarded");
                Ok(Ack::Forwarded { node: entry.owner })
            }
            Ok(FabricResponse::NotHere) => Err(RouterError::undeliverable(
                device_id,
                format!("node {} no longer holds the mailbox", entry.owner),
            )),
            Ok(other) => Err(RouterError::undeliverable(
                device_id,
                format!("node {} answered {}", entry.owner, other.status()),
            )),
            Err(e) => {
                warn!(owner = %entry.owner, error = %e, "forward failed");
                Err(RouterError::undeliverable(device_id, e.to_string()))
            }
        }
    }

    /// Node currently owning the device's mailbox, fleet-wide
    pub async fn resolve(&self, device_id: &DeviceId) -> RouterResult<Option<NodeId>> {
        Ok(self.table.resolve(device_id).await?.map(|entry| entry.owner))
    }

    /// Whether the device has a live mailbox anywhere.
    ///
    /// Remote owners are asked directly, so a route left by a node that is
    /// gone does not count.
    pub async fn is_device_connected(&self, device_id: &DeviceId) -> RouterResult<bool> {
        if self.registry.lookup(device_id).is_some() {
            return Ok(true);
        }
        let Some(entry) = self.table.resolve(device_id).await? else {
            return Ok(false);
        };
        if entry.owner == self.node_id {
            return Ok(false);
        }
        let probe = FabricRequest::Resolve {
            device_id: device_id.clone(),
        };
        match self.fabric.request(&entry.owner, probe).await {
            Ok(FabricResponse::Present { generation }) => Ok(generation == entry.generation),
            Ok(_) => Ok(false),
            Err(e) => {
                debug!(owner = %entry.owner, error = %e, "owner unreachable while probing device");
                Ok(false)
            }
        }
    }
}
