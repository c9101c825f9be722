mod channel;
mod websocket;

pub use channel::*;
pub use websocket::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Result of one bounded read from a device connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    Frame(String),
    /// Nothing arrived within the wait
    Idle,
    /// Peer closed the connection
    Closed,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport read failed: {0}")]
    Read(String),

    #[error("transport write failed: {0}")]
    Write(String),
}

/// Duplex stream of text frames to and from one device
#[async_trait]
pub trait DeviceTransport: Send {
    async fn read_frame(&mut self, wait: Duration) -> Result<FrameRead, TransportError>;

    async fn write_frame(&mut self, frame: &str) -> Result<(), TransportError>;

    async fn close(&mut self);
}
