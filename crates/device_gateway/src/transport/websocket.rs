use crate::{DeviceTransport, FrameRead, TransportError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// Device connection over a WebSocket.
///
/// Text frames and UTF-8 binary frames are both delivered as text. Pings
/// are answered by tungstenite while reading.
pub struct WebSocketTransport<S> {
    ws: WebSocketStream<S>,
}

impl<S> WebSocketTransport<S> {
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self { ws }
    }
}

#[async_trait]
impl<S> DeviceTransport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self, wait: Duration) -> Result<FrameRead, TransportError> {
        let next = match tokio::time::timeout(wait, self.ws.next()).await {
            Err(_) => return Ok(FrameRead::Idle),
            Ok(None) => return Ok(FrameRead::Closed),
            Ok(Some(next)) => next,
        };

        match next {
            Ok(Message::Text(text)) => Ok(FrameRead::Frame(text)),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => Ok(FrameRead::Frame(text)),
                Err(_) => {
                    warn!("dropping non-UTF-8 binary frame");
                    Ok(FrameRead::Idle)
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(?frame, "peer sent close frame");
                Ok(FrameRead::Closed)
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                Ok(FrameRead::Idle)
            }
            Err(WsError::ConnectionClosed)
            | Err(WsError::AlreadyClosed)
            | Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)) => {
                Ok(FrameRead::Closed)
            }
            Err(e) => Err(TransportError::Read(e.to_string())),
        }
    }

    async fn write_frame(&mut self, frame: &str) -> Result<(), TransportError> {
        self.ws
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!(error = %e, "websocket close handshake failed");
        }
    }
}
