use crate::NodeId;
use common::domain::DeviceId;
use thiserror::Error;

pub type RouterResult<T> = Result<T, RouterError>;

/// Faults surfaced to callers of `create_mailbox` and `send`; never retried here
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("mailbox for device {device_id} already exists on node {owner}")]
    AlreadyExists { device_id: DeviceId, owner: NodeId },

    #[error("directive for device {device_id} is undeliverable: {reason}")]
    Undeliverable { device_id: DeviceId, reason: String },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Fabric(#[from] FabricError),
}

impl RouterError {
    pub(crate) fn undeliverable(device_id: &DeviceId, reason: impl Into<String>) -> Self {
        RouterError::Undeliverable {
            device_id: device_id.clone(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailboxError {
    #[error("mailbox is closed")]
    Closed,
}

#[derive(Error, Debug, Clone)]
pub enum TableError {
    #[error("routing table backend error: {0}")]
    Backend(String),

    #[error("corrupt routing entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum FabricError {
    #[error("node {node} is unreachable: {reason}")]
    Unreachable { node: NodeId, reason: String },

    #[error("request to node {0} timed out")]
    Timeout(NodeId),

    #[error("fabric codec error: {0}")]
    Codec(String),
}
