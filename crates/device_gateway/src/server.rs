use crate::{DeviceSession, SessionContext, WebSocketTransport};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, field, info, info_span, warn, Instrument, Span};

/// Accepts device WebSocket connections and runs one session task per connection
pub struct DeviceServer {
    listener: TcpListener,
    ctx: SessionContext,
    drain_timeout: Duration,
}

impl DeviceServer {
    pub async fn bind(addr: &str, ctx: SessionContext, drain_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind device listener on {}", addr))?;
        Ok(Self {
            listener,
            ctx,
            drain_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until cancelled, then wait (bounded) for every
    /// session to close its mailbox
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<()> {
        let local_addr = self.local_addr()?;
        info!(addr = %local_addr, node_id = %self.ctx.router.node_id(), "device server listening");

        let sessions = TaskTracker::new();

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("device server stopping accept loop");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };

                    let span = info_span!(
                        parent: Span::none(),
                        "device_session",
                        peer_addr = %peer_addr,
                        device_id = field::Empty,
                    );
                    sessions.spawn(
                        serve_connection(stream, self.ctx.clone(), cancellation_token.child_token())
                            .instrument(span),
                    );
                }
            }
        }

        sessions.close();
        info!(open_sessions = sessions.len(), "waiting for device sessions to close");
        if tokio::time::timeout(self.drain_timeout, sessions.wait())
            .await
            .is_err()
        {
            warn!(
                open_sessions = sessions.len(),
                "device sessions did not close within drain timeout"
            );
        }

        Ok(())
    }
}

async fn serve_connection(stream: TcpStream, ctx: SessionContext, shutdown: CancellationToken) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "websocket handshake failed");
            return;
        }
    };
    debug!("websocket connection established");

    let session = DeviceSession::new(ctx, WebSocketTransport::new(ws));
    let end = session.run(shutdown).await;
    debug!(reason = %end, "connection finished");
}
