use crate::{FabricError, Generation, NodeId, RoutingServer};
use async_trait::async_trait;
use common::domain::{DeviceId, DirectiveMessage};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Node-to-node request carried by the fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FabricRequest {
    /// Enqueue a directive into the receiver's local mailbox
    Forward {
        device_id: DeviceId,
        directive: DirectiveMessage,
    },
    /// Close the receiver's mailbox of this generation so another node can take over
    Evict {
        device_id: DeviceId,
        generation: Generation,
    },
    /// Ask whether the receiver holds the mailbox locally
    Resolve { device_id: DeviceId },
}

impl FabricRequest {
    pub fn op(&self) -> &'static str {
        match self {
            FabricRequest::Forward { .. } => "forward",
            FabricRequest::Evict { .. } => "evict",
            FabricRequest::Resolve { .. } => "resolve",
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        match self {
            FabricRequest::Forward { device_id, .. }
            | FabricRequest::Evict { device_id, .. }
            | FabricRequest::Resolve { device_id } => device_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FabricResponse {
    Delivered,
    Evicted,
    Present { generation: Generation },
    /// The receiver has no live mailbox for the device
    NotHere,
    Failed { reason: String },
}

impl FabricResponse {
    pub fn status(&self) -> &'static str {
        match self {
            FabricResponse::Delivered => "delivered",
            FabricResponse::Evicted => "evicted",
            FabricResponse::Present { .. } => "present",
            FabricResponse::NotHere => "not_here",
            FabricResponse::Failed { .. } => "failed",
        }
    }
}

/// Carries requests to the routing server of another node
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait FabricTransport: Send + Sync {
    async fn request(
        &self,
        node: &NodeId,
        request: FabricRequest,
    ) -> Result<FabricResponse, FabricError>;
}

/// In-process fabric connecting routing servers that share one runtime
#[derive(Default)]
pub struct LocalFabric {
    servers: DashMap<NodeId, Arc<RoutingServer>>,
}

impl LocalFabric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, server: Arc<RoutingServer>) {
        self.servers.insert(server.node_id().clone(), server);
    }

    /// Detach a node, making it unreachable as if it had crashed
    pub fn disconnect(&self, node: &NodeId) -> bool {
        self.servers.remove(node).is_some()
    }
}

#[async_trait]
impl FabricTransport for LocalFabric {
    async fn request(
        &self,
        node: &NodeId,
        request: FabricRequest,
    ) -> Result<FabricResponse, FabricError> {
        let server = self
            .servers
            .get(node)
            .map(|server| Arc::clone(&server))
            .ok_or_else(|| FabricError::Unreachable {
                node: node.clone(),
                reason: "node not attached to local fabric".to_string(),
            })?;
        Ok(server.handle(request).await)
    }
}
