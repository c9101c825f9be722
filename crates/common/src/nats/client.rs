use anyhow::{Context, Result};
use async_nats::jetstream::{self, kv};
use std::time::Duration;
use tracing::info;

/// Shared NATS connection plus its JetStream context
#[derive(Clone)]
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("Successfully connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Open a key-value bucket, creating it when missing.
    ///
    /// Entries older than `max_age` are expired by the server, which is what
    /// bounds a routing claim whose owner stopped renewing it.
    pub async fn ensure_kv_bucket(&self, bucket: &str, max_age: Duration) -> Result<kv::Store> {
        match self.jetstream.get_key_value(bucket).await {
            Ok(store) => {
                info!(bucket = %bucket, "Key-value bucket already exists");
                Ok(store)
            }
            Err(_) => {
                let store = self
                    .jetstream
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        description: "Device mailbox ownership".to_string(),
                        history: 1,
                        max_age,
                        ..Default::default()
                    })
                    .await
                    .context("Failed to create key-value bucket")?;
                info!(bucket = %bucket, max_age_ms = max_age.as_millis(), "Created key-value bucket");
                Ok(store)
            }
        }
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    pub async fn close(self) {
        info!("Closing NATS connection");
        if let Err(e) = self.client.drain().await {
            tracing::warn!(error = %e, "NATS drain failed");
        }
    }
}
