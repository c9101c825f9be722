use crate::{DeviceTransport, FrameRead, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// In-process transport; the device side is a [`ChannelPeer`].
///
/// Dropping the peer's sender reads as a closed connection.
pub struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Device end of a [`ChannelTransport`]
pub struct ChannelPeer {
    pub to_server: mpsc::UnboundedSender<String>,
    pub from_server: mpsc::UnboundedReceiver<String>,
}

impl ChannelTransport {
    pub fn pair() -> (ChannelTransport, ChannelPeer) {
        let (to_server, inbound) = mpsc::unbounded_channel();
        let (outbound, from_server) = mpsc::unbounded_channel();
        (
            ChannelTransport { inbound, outbound },
            ChannelPeer {
                to_server,
                from_server,
            },
        )
    }
}

#[async_trait]
impl DeviceTransport for ChannelTransport {
    async fn read_frame(&mut self, wait: Duration) -> Result<FrameRead, TransportError> {
        match tokio::time::timeout(wait, self.inbound.recv()).await {
            Ok(Some(frame)) => Ok(FrameRead::Frame(frame)),
            Ok(None) => Ok(FrameRead::Closed),
            Err(_) => Ok(FrameRead::Idle),
        }
    }

    async fn write_frame(&mut self, frame: &str) -> Result<(), TransportError> {
        self.outbound
            .send(frame.to_string())
            .map_err(|_| TransportError::Write("peer is gone".to_string()))
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}
