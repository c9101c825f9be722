use crate::{
    FabricRequest, FabricResponse, MailboxRegistry, NodeId, RouteEntry, RoutingTable,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Receive side of a node: answers fabric requests against the local
/// registry and keeps the node's routing leases alive.
pub struct RoutingServer {
    node_id: NodeId,
    registry: Arc<MailboxRegistry>,
    table: Arc<dyn RoutingTable>,
}

impl RoutingServer {
    pub fn new(
        node_id: NodeId,
        registry: Arc<MailboxRegistry>,
        table: Arc<dyn RoutingTable>,
    ) -> Self {
        Self {
            node_id,
            registry,
            table,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    #[instrument(skip(self, request), fields(node_id = %self.node_id, op = request.op(), device_id = %request.device_id()))]
    pub async fn handle(&self, request: FabricRequest) -> FabricResponse {
        match request {
            FabricRequest::Forward {
                device_id,
                directive,
            } => match self.registry.deliver(&device_id, directive) {
                Ok(()) => {
                    debug!("forwarded directive enqueued");
                    FabricResponse::Delivered
                }
                Err(_) => FabricResponse::NotHere,
            },
            FabricRequest::Evict {
                device_id,
                generation,
            } => {
                let Some(evicted) = self.registry.remove(&device_id, generation) else {
                    return FabricResponse::NotHere;
                };
                let entry = RouteEntry::new(self.node_id.clone(), evicted.generation());
                if let Err(e) = self.table.release(&device_id, &entry).await {
                    warn!(error = %e, "failed to release routing entry after eviction");
                }
                info!(generation = %generation, "evicted mailbox on request");
                FabricResponse::Evicted
            }
            FabricRequest::Resolve { device_id } => match self.registry.lookup(&device_id) {
                Some(handle) => FabricResponse::Present {
                    generation: handle.generation(),
                },
                None => FabricResponse::NotHere,
            },
        }
    }

    /// Renew the lease of every local mailbox once.
    ///
    /// A mailbox whose lease was lost (expired and claimed elsewhere) is
    /// closed so its session ends instead of holding an unreachable mailbox.
    pub async fn renew_leases(&self) -> usize {
        let mut renewed = 0;
        for (device_id, generation) in self.registry.snapshot() {
            let entry = RouteEntry::new(self.node_id.clone(), generation);
            match self.table.renew(&device_id, &entry).await {
                Ok(true) => renewed += 1,
                Ok(false) => {
                    warn!(device_id = %device_id, generation = %generation, "routing lease lost, closing mailbox");
                    self.registry.remove(&device_id, generation);
                }
                Err(e) => {
                    error!(device_id = %device_id, error = %e, "failed to renew routing lease");
                }
            }
        }
        renewed
    }

    /// Renew leases every `interval` until cancelled
    pub async fn run_lease_renewal(
        self: Arc<Self>,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> anyhow::Result<()> {
        info!(node_id = %self.node_id, interval_ms = interval.as_millis(), "starting lease renewal");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!(node_id = %self.node_id, "lease renewal stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let renewed = self.renew_leases().await;
                    debug!(renewed, "renewed routing leases");
                }
            }
        }

        Ok(())
    }

    /// Close every local mailbox and release its routing entry; used when
    /// the node leaves the fleet
    pub async fn release_all(&self) -> usize {
        let mut released = 0;
        for (device_id, generation) in self.registry.snapshot() {
            if self.registry.remove(&device_id, generation).is_none() {
                continue;
            }
            let entry = RouteEntry::new(self.node_id.clone(), generation);
            if let Err(e) = self.table.release(&device_id, &entry).await {
                warn!(device_id = %device_id, error = %e, "failed to release routing entry");
            }
            released += 1;
        }
        info!(node_id = %self.node_id, released, "released local mailboxes");
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Generation, MockRoutingTable};
    use common::domain::{DeviceId, DirectiveMessage};
    use mockall::predicate::*;
    use serde_json::json;

    fn device() -> DeviceId {
        DeviceId::parse("D1").unwrap()
    }

    fn server_with(table: MockRoutingTable) -> (RoutingServer, Arc<MailboxRegistry>) {
        let registry = Arc::new(MailboxRegistry::new());
        let server = RoutingServer::new(NodeId::new("node-a"), registry.clone(), Arc::new(table));
        (server, registry)
    }

    #[tokio::test]
    async fn test_forward_to_missing_mailbox_is_not_here() {
        let (server, registry) = server_with(MockRoutingTable::new());

        let response = server
            .handle(FabricRequest::Forward {
                device_id: device(),
                directive: DirectiveMessage::new(json!({"cmd": "x"})),
            })
            .await;

        assert_eq!(response, FabricResponse::NotHere);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_evict_releases_matching_generation() {
        let generation = Generation::new();
        let mut table = MockRoutingTable::new();
        table
            .expect_release()
            .with(eq(device()), eq(RouteEntry::new(NodeId::new("node-a"), generation)))
            .times(1)
            .returning(|_, _| Ok(true));
        let (server, registry) = server_with(table);
        let mailbox = registry.register(&device(), generation, false).unwrap().mailbox;

        let response = server
            .handle(FabricRequest::Evict {
                device_id: device(),
                generation,
            })
            .await;

        assert_eq!(response, FabricResponse::Evicted);
        assert!(mailbox.is_closed());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_evict_ignores_other_generation() {
        let (server, registry) = server_with(MockRoutingTable::new());
        let _mailbox = registry.register(&device(), Generation::new(), false).unwrap();

        let response = server
            .handle(FabricRequest::Evict {
                device_id: device(),
                generation: Generation::new(),
            })
            .await;

        assert_eq!(response, FabricResponse::NotHere);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_lost_lease_closes_mailbox() {
        let mut table = MockRoutingTable::new();
        table.expect_renew().times(1).returning(|_, _| Ok(false));
        let (server, registry) = server_with(table);
        let mailbox = registry.register(&device(), Generation::new(), false).unwrap().mailbox;

        assert_eq!(server.renew_leases().await, 0);
        assert!(mailbox.is_closed());
        assert!(registry.is_empty());
    }
}
