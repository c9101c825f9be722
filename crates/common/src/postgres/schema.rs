use crate::postgres::PostgresClient;
use anyhow::{Context, Result};
use tracing::info;

/// Provisioning table for devices; descriptors are stored as JSONB
pub const DEVICES_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS devices (
    device_id TEXT PRIMARY KEY,
    friendly_name TEXT NOT NULL,
    sddl JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

/// Create the devices table when it does not exist yet
pub async fn ensure_device_schema(client: &PostgresClient) -> Result<()> {
    let conn = client.get_connection().await?;
    conn.batch_execute(DEVICES_TABLE_DDL)
        .await
        .context("failed to create devices table")?;
    info!("device schema ready");
    Ok(())
}
