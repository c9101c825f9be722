use crate::{
    Ack, Claim, FabricRequest, FabricResponse, FabricTransport, Generation, Mailbox,
    MailboxPolicy, MailboxRegistry, NodeId, Outbox, RouteEntry, RouterError, RouterResult,
    RoutingServer, RoutingTable,
};
use common::domain::{DeviceId, DirectiveMessage};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Bounds the claim/evict loop when several nodes race for one device
const MAX_CLAIM_ATTEMPTS: usize = 3;

/// A node's view of the fabric: creates and closes local mailboxes and
/// sends to any mailbox in the fleet.
pub struct MailboxRouter {
    node_id: NodeId,
    policy: MailboxPolicy,
    registry: Arc<MailboxRegistry>,
    table: Arc<dyn RoutingTable>,
    fabric: Arc<dyn FabricTransport>,
    server: Arc<RoutingServer>,
    outbox: Outbox,
}

impl MailboxRouter {
    pub fn new(
        node_id: NodeId,
        policy: MailboxPolicy,
        table: Arc<dyn RoutingTable>,
        fabric: Arc<dyn FabricTransport>,
    ) -> Self {
        let registry = Arc::new(MailboxRegistry::new());
        let server = Arc::new(RoutingServer::new(
            node_id.clone(),
            registry.clone(),
            table.clone(),
        ));
        let outbox = Outbox::new(
            node_id.clone(),
            registry.clone(),
            table.clone(),
            fabric.clone(),
        );

        Self {
            node_id,
            policy,
            registry,
            table,
            fabric,
            server,
            outbox,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn policy(&self) -> MailboxPolicy {
        self.policy
    }

    pub fn server(&self) -> Arc<RoutingServer> {
        self.server.clone()
    }

    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Create this node's mailbox for `device_id` and announce it fleet-wide.
    ///
    /// With `MailboxPolicy::Reject` a live mailbox anywhere in the fleet fails
    /// the call with `AlreadyExists`. With `MailboxPolicy::Evict` the current
    /// owner is asked to close its mailbox first; an owner that cannot be
    /// reached has its entry force-released.
    #[instrument(skip(self), fields(node_id = %self.node_id, device_id = %device_id, policy = %self.policy))]
    pub async fn create_mailbox(&self, device_id: &DeviceId) -> RouterResult<Mailbox> {
        let generation = Generation::new();
        let replace = self.policy == MailboxPolicy::Evict;

        let registered = self
            .registry
            .register(device_id, generation, replace)
            .map_err(|_| RouterError::AlreadyExists {
                device_id: device_id.clone(),
                owner: self.node_id.clone(),
            })?;
        let mailbox = registered.mailbox;

        if let Some(displaced) = registered.displaced {
            let old = RouteEntry::new(self.node_id.clone(), displaced.generation());
            if let Err(e) = self.table.release(device_id, &old).await {
                warn!(error = %e, "failed to release displaced local entry");
            }
            debug!(generation = %displaced.generation(), "replaced local mailbox");
        }

        match self.claim(device_id, generation).await {
            Ok(()) => {
                info!(generation = %generation, "mailbox created");
                Ok(mailbox)
            }
            Err(e) => {
                self.registry.remove(device_id, generation);
                Err(e)
            }
        }
    }

    async fn claim(&self, device_id: &DeviceId, generation: Generation) -> RouterResult<()> {
        let entry = RouteEntry::new(self.node_id.clone(), generation);
        let mut holder = None;

        for attempt in 0..MAX_CLAIM_ATTEMPTS {
            match self.table.claim(device_id, &entry).await? {
                Claim::Granted => {
                    // a concurrent local create may have replaced us meanwhile
                    if !self.registry.is_current(device_id, generation) {
                        self.table.release(device_id, &entry).await?;
                        return Err(RouterError::AlreadyExists {
                            device_id: device_id.clone(),
                            owner: self.node_id.clone(),
                        });
                    }
                    return Ok(());
                }
                Claim::Held(current) => {
                    // a newer local create displaced us; its entry must survive
                    if !self.registry.is_current(device_id, generation) {
                        return Err(RouterError::AlreadyExists {
                            device_id: device_id.clone(),
                            owner: current.owner,
                        });
                    }
                    if self.policy == MailboxPolicy::Reject {
                        return Err(RouterError::AlreadyExists {
                            device_id: device_id.clone(),
                            owner: current.owner,
                        });
                    }
                    debug!(attempt, owner = %current.owner, "device owned elsewhere, evicting");
                    self.evict(device_id, &current).await?;
                    holder = Some(current.owner);
                }
            }
        }

        Err(RouterError::AlreadyExists {
            device_id: device_id.clone(),
            owner: holder.unwrap_or_else(|| self.node_id.clone()),
        })
    }

    async fn evict(&self, device_id: &DeviceId, current: &RouteEntry) -> RouterResult<()> {
        let request = FabricRequest::Evict {
            device_id: device_id.clone(),
            generation: current.generation,
        };
        let response = if current.owner == self.node_id {
            Ok(self.server.handle(request).await)
        } else {
            self.fabric.request(&current.owner, request).await
        };

        match response {
            Ok(FabricResponse::Evicted) => {
                info!(owner = %current.owner, "previous owner closed its mailbox");
            }
            Ok(other) => {
                debug!(owner = %current.owner, status = other.status(), "owner did not hold the mailbox");
            }
            Err(e) => {
                warn!(owner = %current.owner, error = %e, "owner unreachable during eviction");
            }
        }

        // no-op when the owner already released its entry
        self.table.force_release(device_id, current).await?;
        Ok(())
    }

    /// Local mailbox lookup; `None` when this node does not hold the device
    pub fn lookup_mailbox(&self, device_id: &DeviceId) -> Option<crate::MailboxHandle> {
        self.registry.lookup(device_id)
    }

    pub async fn resolve(&self, device_id: &DeviceId) -> RouterResult<Option<NodeId>> {
        self.outbox.resolve(device_id).await
    }

    pub async fn send(
        &self,
        device_id: &DeviceId,
        directive: DirectiveMessage,
    ) -> RouterResult<Ack> {
        self.outbox.send(device_id, directive).await
    }

    pub async fn is_device_connected(&self, device_id: &DeviceId) -> RouterResult<bool> {
        self.outbox.is_device_connected(device_id).await
    }

    /// Close whatever mailbox this node holds for `device_id`; idempotent
    #[instrument(skip(self), fields(node_id = %self.node_id, device_id = %device_id))]
    pub async fn close_mailbox(&self, device_id: &DeviceId) -> RouterResult<()> {
        let Some(handle) = self.registry.remove_any(device_id) else {
            return Ok(());
        };
        let entry = RouteEntry::new(self.node_id.clone(), handle.generation());
        self.table.release(device_id, &entry).await?;
        info!(generation = %handle.generation(), "mailbox closed");
        Ok(())
    }

    /// Close a session's own mailbox.
    ///
    /// Only entries of this mailbox's generation are removed, so closing a
    /// mailbox that was already evicted never touches its successor.
    #[instrument(skip(self, mailbox), fields(node_id = %self.node_id, device_id = %mailbox.device_id()))]
    pub async fn close(&self, mut mailbox: Mailbox) -> RouterResult<()> {
        mailbox.close();
        let device_id = mailbox.device_id();
        let generation = mailbox.generation();

        self.registry.remove(device_id, generation);
        let entry = RouteEntry::new(self.node_id.clone(), generation);
        let released = self.table.release(device_id, &entry).await?;
        info!(generation = %generation, released, "mailbox closed");
        Ok(())
    }

    pub fn local_mailbox_count(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryRoutingTable, LocalFabric, MailboxError};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(50);

    struct Fleet {
        table: Arc<InMemoryRoutingTable>,
        fabric: Arc<LocalFabric>,
    }

    impl Fleet {
        fn new() -> Self {
            Self {
                table: Arc::new(InMemoryRoutingTable::new(Duration::from_secs(30))),
                fabric: Arc::new(LocalFabric::new()),
            }
        }

        fn node(&self, name: &str, policy: MailboxPolicy) -> Arc<MailboxRouter> {
            let router = Arc::new(MailboxRouter::new(
                NodeId::new(name),
                policy,
                self.table.clone(),
                self.fabric.clone(),
            ));
            self.fabric.register(router.server());
            router
        }
    }

    fn device() -> DeviceId {
        DeviceId::parse("D1").unwrap()
    }

    fn directive(n: u32) -> DirectiveMessage {
        DirectiveMessage::new(json!({ "seq": n }))
    }

    #[tokio::test]
    async fn test_concurrent_create_with_reject_yields_one_winner() {
        let fleet = Fleet::new();
        let a = fleet.node("node-a", MailboxPolicy::Reject);
        let b = fleet.node("node-b", MailboxPolicy::Reject);

        let id = device();
        let (ra, rb) = tokio::join!(a.create_mailbox(&id), b.create_mailbox(&id));

        let successes = [ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        let failure = if ra.is_err() { ra.err() } else { rb.err() };
        assert!(matches!(failure, Some(RouterError::AlreadyExists { .. })));
        assert_eq!(a.local_mailbox_count() + b.local_mailbox_count(), 1);
    }

    #[tokio::test]
    async fn test_second_create_on_same_node_with_reject_fails() {
        let fleet = Fleet::new();
        let a = fleet.node("node-a", MailboxPolicy::Reject);

        let _first = a.create_mailbox(&device()).await.unwrap();
        let second = a.create_mailbox(&device()).await;

        assert!(matches!(second, Err(RouterError::AlreadyExists { owner, .. }) if owner.as_str() == "node-a"));
    }

    #[tokio::test]
    async fn test_evict_moves_ownership_between_nodes() {
        let fleet = Fleet::new();
        let a = fleet.node("node-a", MailboxPolicy::Evict);
        let b = fleet.node("node-b", MailboxPolicy::Evict);

        let mut old = a.create_mailbox(&device()).await.unwrap();
        let mut new = b.create_mailbox(&device()).await.unwrap();

        assert_eq!(old.receive(WAIT).await, Err(MailboxError::Closed));
        assert_eq!(a.resolve(&device()).await.unwrap(), Some(NodeId::new("node-b")));

        // the evicted session's late close must not tear down the new owner
        a.close(old).await.unwrap();
        assert_eq!(a.resolve(&device()).await.unwrap(), Some(NodeId::new("node-b")));

        a.send(&device(), directive(1)).await.unwrap();
        assert_eq!(new.receive(WAIT).await.unwrap(), Some(directive(1)));
    }

    #[tokio::test]
    async fn test_evict_force_releases_unreachable_owner() {
        let fleet = Fleet::new();
        let a = fleet.node("node-a", MailboxPolicy::Evict);
        let b = fleet.node("node-b", MailboxPolicy::Evict);

        let _orphan = a.create_mailbox(&device()).await.unwrap();
        fleet.fabric.disconnect(a.node_id());

        let _mailbox = b.create_mailbox(&device()).await.unwrap();

        assert_eq!(b.resolve(&device()).await.unwrap(), Some(NodeId::new("node-b")));
    }

    #[tokio::test]
    async fn test_remote_send_is_fifo() {
        let fleet = Fleet::new();
        let a = fleet.node("node-a", MailboxPolicy::Evict);
        let b = fleet.node("node-b", MailboxPolicy::Evict);
        let mut mailbox = a.create_mailbox(&device()).await.unwrap();

        for n in 0..10 {
            let ack = b.send(&device(), directive(n)).await.unwrap();
            assert_eq!(ack, Ack::Forwarded { node: NodeId::new("node-a") });
        }

        for n in 0..10 {
            assert_eq!(mailbox.receive(WAIT).await.unwrap(), Some(directive(n)));
        }
    }

    #[tokio::test]
    async fn test_send_after_close_is_undeliverable() {
        let fleet = Fleet::new();
        let a = fleet.node("node-a", MailboxPolicy::Evict);
        let b = fleet.node("node-b", MailboxPolicy::Evict);
        let mailbox = a.create_mailbox(&device()).await.unwrap();
        assert!(b.is_device_connected(&device()).await.unwrap());

        a.close(mailbox).await.unwrap();

        assert_eq!(b.resolve(&device()).await.unwrap(), None);
        assert!(!b.is_device_connected(&device()).await.unwrap());
        let result = b.send(&device(), directive(1)).await;
        assert!(matches!(result, Err(RouterError::Undeliverable { .. })));
        assert_eq!(a.local_mailbox_count(), 0);
        assert_eq!(b.local_mailbox_count(), 0);
    }

    #[tokio::test]
    async fn test_close_mailbox_is_idempotent() {
        let fleet = Fleet::new();
        let a = fleet.node("node-a", MailboxPolicy::Evict);
        let mut mailbox = a.create_mailbox(&device()).await.unwrap();

        a.close_mailbox(&device()).await.unwrap();
        a.close_mailbox(&device()).await.unwrap();

        assert_eq!(mailbox.receive(Duration::from_secs(5)).await, Err(MailboxError::Closed));
        assert!(fleet.table.is_empty());
    }

    #[tokio::test]
    async fn test_recreate_on_same_node_replaces_previous() {
        let fleet = Fleet::new();
        let a = fleet.node("node-a", MailboxPolicy::Evict);

        let old = a.create_mailbox(&device()).await.unwrap();
        let new = a.create_mailbox(&device()).await.unwrap();

        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert_eq!(a.local_mailbox_count(), 1);
        assert_eq!(a.resolve(&device()).await.unwrap(), Some(NodeId::new("node-a")));
    }

    /// Delays the first claim so a later create can win the table race
    struct SlowFirstClaim {
        inner: InMemoryRoutingTable,
        delayed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl RoutingTable for SlowFirstClaim {
        async fn claim(
            &self,
            device_id: &DeviceId,
            entry: &RouteEntry,
        ) -> Result<Claim, crate::TableError> {
            if !self.delayed.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.inner.claim(device_id, entry).await
        }

        async fn resolve(&self, device_id: &DeviceId) -> Result<Option<RouteEntry>, crate::TableError> {
            self.inner.resolve(device_id).await
        }

        async fn renew(&self, device_id: &DeviceId, entry: &RouteEntry) -> Result<bool, crate::TableError> {
            self.inner.renew(device_id, entry).await
        }

        async fn release(&self, device_id: &DeviceId, entry: &RouteEntry) -> Result<bool, crate::TableError> {
            self.inner.release(device_id, entry).await
        }
    }

    #[tokio::test]
    async fn test_displaced_create_does_not_evict_its_successor() {
        let table = Arc::new(SlowFirstClaim {
            inner: InMemoryRoutingTable::new(Duration::from_secs(30)),
            delayed: AtomicBool::new(false),
        });
        let fabric = Arc::new(LocalFabric::new());
        let a = Arc::new(MailboxRouter::new(
            NodeId::new("node-a"),
            MailboxPolicy::Evict,
            table,
            fabric.clone(),
        ));
        fabric.register(a.server());

        let first = tokio::spawn({
            let a = a.clone();
            async move { a.create_mailbox(&device()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut newest = a.create_mailbox(&device()).await.unwrap();
        let first = first.await.unwrap();

        assert!(matches!(first, Err(RouterError::AlreadyExists { .. })));
        assert!(!newest.is_closed());
        assert_eq!(a.local_mailbox_count(), 1);
        assert_eq!(a.resolve(&device()).await.unwrap(), Some(NodeId::new("node-a")));

        a.send(&device(), directive(7)).await.unwrap();
        assert_eq!(newest.receive(WAIT).await.unwrap(), Some(directive(7)));
    }
}
