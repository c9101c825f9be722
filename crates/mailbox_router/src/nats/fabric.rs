use crate::{FabricError, FabricRequest, FabricResponse, FabricTransport, NodeId, RoutingServer};
use anyhow::Context;
use async_nats::RequestErrorKind;
use async_trait::async_trait;
use bytes::Bytes;
use common::nats::{headers_with_trace_context, link_span_to_headers};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

fn node_subject(prefix: &str, node: &NodeId) -> String {
    format!("{}.node.{}", prefix, node)
}

/// Fabric transport over NATS request/reply, one subject per node
pub struct NatsFabric {
    client: async_nats::Client,
    subject_prefix: String,
    request_timeout: Duration,
}

impl NatsFabric {
    pub fn new(client: async_nats::Client, subject_prefix: String, request_timeout: Duration) -> Self {
        Self {
            client,
            subject_prefix,
            request_timeout,
        }
    }
}

#[async_trait]
impl FabricTransport for NatsFabric {
    async fn request(
        &self,
        node: &NodeId,
        request: FabricRequest,
    ) -> Result<FabricResponse, FabricError> {
        let subject = node_subject(&self.subject_prefix, node);
        let body = serde_json::to_vec(&request).map_err(|e| FabricError::Codec(e.to_string()))?;

        let pending = self.client.request_with_headers(
            subject,
            headers_with_trace_context(),
            Bytes::from(body),
        );
        let reply = match tokio::time::timeout(self.request_timeout, pending).await {
            Err(_) => return Err(FabricError::Timeout(node.clone())),
            Ok(Err(e)) if e.kind() == RequestErrorKind::TimedOut => {
                return Err(FabricError::Timeout(node.clone()))
            }
            Ok(Err(e)) => {
                return Err(FabricError::Unreachable {
                    node: node.clone(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(reply)) => reply,
        };

        serde_json::from_slice(&reply.payload).map_err(|e| FabricError::Codec(e.to_string()))
    }
}

/// Answer fabric requests addressed to this node until cancelled
pub async fn serve_fabric(
    client: async_nats::Client,
    subject_prefix: String,
    server: Arc<RoutingServer>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let subject = node_subject(&subject_prefix, server.node_id());
    let mut subscription = client
        .subscribe(subject.clone())
        .await
        .context("failed to subscribe to fabric subject")?;

    info!(subject = %subject, "routing server listening");

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!(subject = %subject, "routing server stopping");
                break;
            }
            message = subscription.next() => {
                let Some(message) = message else {
                    error!(subject = %subject, "fabric subscription ended");
                    anyhow::bail!("fabric subscription on {} ended unexpectedly", subject);
                };

                let async_nats::Message { subject: request_subject, reply, payload, headers, .. } = message;
                let span = info_span!(parent: Span::none(), "fabric_request", subject = %request_subject);
                link_span_to_headers(&span, headers.as_ref());

                async {
                    let Some(reply) = reply else {
                        warn!("fabric request without reply subject, dropping");
                        return;
                    };
                    let response = match serde_json::from_slice::<FabricRequest>(&payload) {
                        Ok(request) => server.handle(request).await,
                        Err(e) => {
                            warn!(error = %e, "malformed fabric request");
                            FabricResponse::Failed { reason: e.to_string() }
                        }
                    };
                    let body = match serde_json::to_vec(&response) {
                        Ok(body) => body,
                        Err(e) => {
                            error!(error = %e, "failed to encode fabric response");
                            return;
                        }
                    };
                    if let Err(e) = client.publish(reply, Bytes::from(body)).await {
                        error!(error = %e, "failed to publish fabric response");
                    } else {
                        debug!(status = response.status(), "fabric response sent");
                    }
                }
                .instrument(span)
                .await;
            }
        }
    }

    if let Err(e) = subscription.unsubscribe().await {
        warn!(error = %e, "failed to unsubscribe fabric subject");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_subject() {
        assert_eq!(
            node_subject("canopy.fabric", &NodeId::new("node-a")),
            "canopy.fabric.node.node-a"
        );
    }
}
