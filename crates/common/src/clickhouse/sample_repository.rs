use crate::clickhouse::ClickHouseClient;
use crate::domain::{DomainError, DomainResult, SampleRepository, SensorSample, TypedValue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

/// One sample row; exactly one `value_*` column is populated, named by `value_kind`
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct SensorSampleRow {
    pub device_id: String,
    pub sensor_name: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub recorded_at: DateTime<Utc>,
    pub value_kind: String,
    pub value_int: Option<i64>,
    pub value_float: Option<f32>,
    pub value_double: Option<f64>,
    pub value_bool: Option<bool>,
    pub value_string: Option<String>,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis::option")]
    pub value_timestamp: Option<DateTime<Utc>>,
}

/// Convert domain SensorSample to database SensorSampleRow
impl From<&SensorSample> for SensorSampleRow {
    fn from(sample: &SensorSample) -> Self {
        let mut row = SensorSampleRow {
            device_id: sample.device_id.to_string(),
            sensor_name: sample.sensor_name.clone(),
            recorded_at: sample.recorded_at,
            value_kind: sample.value.kind().to_string(),
            value_int: None,
            value_float: None,
            value_double: None,
            value_bool: None,
            value_string: None,
            value_timestamp: None,
        };

        match &sample.value {
            TypedValue::Void => {}
            TypedValue::String(v) => row.value_string = Some(v.clone()),
            TypedValue::Bool(v) => row.value_bool = Some(*v),
            TypedValue::Int(v) => row.value_int = Some(*v),
            TypedValue::Float(v) => row.value_float = Some(*v),
            TypedValue::Double(v) => row.value_double = Some(*v),
            TypedValue::Timestamp(v) => row.value_timestamp = Some(*v),
        }

        row
    }
}

/// ClickHouse implementation of SampleRepository
#[derive(Clone)]
pub struct ClickHouseSampleRepository {
    client: ClickHouseClient,
    table: String,
}

impl ClickHouseSampleRepository {
    pub fn new(client: ClickHouseClient, table: String) -> Self {
        Self { client, table }
    }

    /// Create the samples table when it does not exist yet
    pub async fn ensure_table(&self) -> anyhow::Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                device_id String,
                sensor_name LowCardinality(String),
                recorded_at DateTime64(3, 'UTC'),
                value_kind LowCardinality(String),
                value_int Nullable(Int64),
                value_float Nullable(Float32),
                value_double Nullable(Float64),
                value_bool Nullable(Bool),
                value_string Nullable(String),
                value_timestamp Nullable(DateTime64(3, 'UTC'))
            )
            ENGINE = MergeTree
            ORDER BY (device_id, sensor_name, recorded_at)",
            self.table
        );
        self.client.get_client().query(&ddl).execute().await?;
        info!(table = %self.table, "sample table ready");
        Ok(())
    }
}

#[async_trait]
impl SampleRepository for ClickHouseSampleRepository {
    #[instrument(skip(self, sample), fields(device_id = %sample.device_id, sensor = %sample.sensor_name))]
    async fn insert_sample(&self, sample: &SensorSample) -> DomainResult<()> {
        let row = SensorSampleRow::from(sample);

        let mut insert = self
            .client
            .get_client()
            .insert::<SensorSampleRow>(&self.table)
            .await
            .map_err(|e| {
                error!("failed to create ClickHouse insert: {}", e);
                DomainError::RepositoryError(e.into())
            })?;

        insert.write(&row).await.map_err(|e| {
            error!("failed to write sample row to ClickHouse: {}", e);
            DomainError::RepositoryError(e.into())
        })?;

        insert.end().await.map_err(|e| {
            error!("failed to finalize ClickHouse insert: {}", e);
            DomainError::RepositoryError(e.into())
        })?;

        debug!(table = %self.table, kind = %row.value_kind, "stored sample");
        Ok(())
    }
}
