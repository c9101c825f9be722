#![cfg(feature = "integration-tests")]

use chrono::Utc;
use clickhouse::Row;
use common::clickhouse::{ClickHouseClient, ClickHouseConfig, ClickHouseSampleRepository};
use common::domain::{DeviceId, SampleRepository, SensorSample, TypedValue};
use serde::Deserialize;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::clickhouse::ClickHouse;

#[derive(Debug, Row, Deserialize)]
struct StoredValue {
    sensor_name: String,
    value_kind: String,
    value_float: Option<f32>,
    value_int: Option<i64>,
}

async fn setup() -> (ContainerAsync<ClickHouse>, ClickHouseClient, ClickHouseSampleRepository) {
    let container = ClickHouse::default().start().await.unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(8123).await.unwrap();

    let client = ClickHouseClient::new(&ClickHouseConfig {
        url: format!("http://{}:{}", host, port),
        database: "default".to_string(),
        username: "default".to_string(),
        password: String::new(),
        samples_table: "sensor_samples".to_string(),
    });
    client.ping().await.unwrap();

    let repo = ClickHouseSampleRepository::new(client.clone(), "sensor_samples".to_string());
    repo.ensure_table().await.unwrap();

    (container, client, repo)
}

#[tokio::test]
async fn test_insert_sample_writes_typed_column() {
    let (_container, client, repo) = setup().await;
    let device_id = DeviceId::parse("D1").unwrap();

    repo.insert_sample(&SensorSample {
        device_id: device_id.clone(),
        sensor_name: "temp".to_string(),
        recorded_at: Utc::now(),
        value: TypedValue::Float(21.5),
    })
    .await
    .unwrap();
    repo.insert_sample(&SensorSample {
        device_id,
        sensor_name: "count".to_string(),
        recorded_at: Utc::now(),
        value: TypedValue::Int(7),
    })
    .await
    .unwrap();

    let rows = client
        .get_client()
        .query("SELECT ?fields FROM sensor_samples WHERE device_id = ? ORDER BY sensor_name")
        .bind("D1")
        .fetch_all::<StoredValue>()
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].sensor_name, "count");
    assert_eq!(rows[0].value_kind, "int");
    assert_eq!(rows[0].value_int, Some(7));
    assert_eq!(rows[1].value_kind, "float");
    assert_eq!(rows[1].value_float, Some(21.5));
    assert_eq!(rows[1].value_int, None);
}

#[tokio::test]
async fn test_ensure_table_is_idempotent() {
    let (_container, _client, repo) = setup().await;

    repo.ensure_table().await.unwrap();
}
