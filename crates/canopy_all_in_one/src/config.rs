use common::clickhouse::ClickHouseConfig;
use common::postgres::PostgresConfig;
use common::telemetry::TelemetryConfig;
use config::{Config, ConfigError, Environment};
use device_gateway::SessionConfig;
use mailbox_router::{LeaseConfig, MailboxPolicy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Telemetry
    /// Service name reported to the OTel collector
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    /// OTLP gRPC endpoint
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Export traces and logs over OTLP
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    // Node identity and device listener
    /// Fleet-unique name of this node; routing entries point at it
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// WebSocket listener host for device connections
    #[serde(default = "default_ws_host")]
    pub ws_host: String,

    /// WebSocket listener port for device connections
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// Time given to open sessions to close their mailboxes on shutdown
    #[serde(default = "default_session_drain_timeout_secs")]
    pub session_drain_timeout_secs: u64,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Subject prefix for node-to-node fabric requests
    #[serde(default = "default_fabric_subject_prefix")]
    pub fabric_subject_prefix: String,

    /// Timeout for a single fabric request in milliseconds
    #[serde(default = "default_fabric_request_timeout_ms")]
    pub fabric_request_timeout_ms: u64,

    /// JetStream KV bucket holding device routing entries
    #[serde(default = "default_routing_bucket")]
    pub routing_bucket: String,

    // Routing
    /// Routing lease lifetime in seconds
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// How often live leases are renewed, in seconds
    #[serde(default = "default_lease_renewal_secs")]
    pub lease_renewal_secs: u64,

    /// What happens when a device reconnects while it still has a mailbox (reject, evict)
    #[serde(default = "default_mailbox_policy")]
    pub mailbox_policy: String,

    // Device session poll cycle
    /// Bounded wait for one inbound frame in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Bounded wait on the mailbox after each read in milliseconds
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Only every Nth accepted frame is scanned for samples
    #[serde(default = "default_sample_every")]
    pub sample_every: u64,

    // Storage
    /// Storage backend (memory, postgres_clickhouse)
    #[serde(default = "default_storage_backend")]
    pub storage_backend: String,

    /// Devices provisioned at startup by the memory backend, as
    /// comma-separated `id` or `id:friendly name` entries
    #[serde(default = "default_device_seeds")]
    pub device_seeds: String,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    // ClickHouse configuration
    /// ClickHouse HTTP URL
    #[serde(default = "default_clickhouse_url")]
    pub clickhouse_url: String,

    #[serde(default = "default_clickhouse_database")]
    pub clickhouse_database: String,

    #[serde(default = "default_clickhouse_username")]
    pub clickhouse_username: String,

    #[serde(default = "default_clickhouse_password")]
    pub clickhouse_password: String,

    /// Table receiving sensor samples
    #[serde(default = "default_clickhouse_samples_table")]
    pub clickhouse_samples_table: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_service_name() -> String {
    "canopy".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_node_id() -> String {
    "canopy-0".to_string()
}

fn default_ws_host() -> String {
    "0.0.0.0".to_string()
}

fn default_ws_port() -> u16 {
    8080
}

fn default_session_drain_timeout_secs() -> u64 {
    5
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_fabric_subject_prefix() -> String {
    "canopy.fabric".to_string()
}

fn default_fabric_request_timeout_ms() -> u64 {
    2_000
}

fn default_routing_bucket() -> String {
    "canopy_routes".to_string()
}

fn default_lease_ttl_secs() -> u64 {
    30
}

fn default_lease_renewal_secs() -> u64 {
    10
}

fn default_mailbox_policy() -> String {
    "evict".to_string()
}

fn default_read_timeout_ms() -> u64 {
    100
}

fn default_receive_timeout_ms() -> u64 {
    100
}

fn default_sample_every() -> u64 {
    10
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_device_seeds() -> String {
    String::new()
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "canopy".to_string()
}

fn default_postgres_username() -> String {
    "canopy".to_string()
}

fn default_postgres_password() -> String {
    "canopy".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    5
}

fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_database() -> String {
    "canopy".to_string()
}

fn default_clickhouse_username() -> String {
    "canopy".to_string()
}

fn default_clickhouse_password() -> String {
    "canopy".to_string()
}

fn default_clickhouse_samples_table() -> String {
    "sensor_samples".to_string()
}

/// Where devices and samples are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    PostgresClickhouse,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres_clickhouse" => Ok(StorageBackend::PostgresClickhouse),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// One device provisioned by the memory backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSeed {
    pub device_id: String,
    pub friendly_name: String,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("CANOPY"))
            .build()?
            .try_deserialize()
    }

    pub fn mailbox_policy(&self) -> Result<MailboxPolicy, ConfigError> {
        self.mailbox_policy.parse().map_err(ConfigError::Message)
    }

    pub fn storage_backend(&self) -> Result<StorageBackend, ConfigError> {
        self.storage_backend.parse().map_err(ConfigError::Message)
    }

    pub fn ws_address(&self) -> String {
        format!("{}:{}", self.ws_host, self.ws_port)
    }

    pub fn device_seeds(&self) -> Vec<DeviceSeed> {
        self.device_seeds
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((id, name)) => DeviceSeed {
                    device_id: id.trim().to_string(),
                    friendly_name: name.trim().to_string(),
                },
                None => DeviceSeed {
                    device_id: entry.to_string(),
                    friendly_name: entry.to_string(),
                },
            })
            .collect()
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            otel_endpoint: self.otel_endpoint.clone(),
            otel_enabled: self.otel_enabled,
            log_level: self.log_level.clone(),
        }
    }

    pub fn lease_config(&self) -> LeaseConfig {
        LeaseConfig {
            ttl: Duration::from_secs(self.lease_ttl_secs),
            renewal_interval: Duration::from_secs(self.lease_renewal_secs),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            sample_every: self.sample_every.max(1),
        }
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }

    pub fn clickhouse_config(&self) -> ClickHouseConfig {
        ClickHouseConfig {
            url: self.clickhouse_url.clone(),
            database: self.clickhouse_database.clone(),
            username: self.clickhouse_username.clone(),
            password: self.clickhouse_password.clone(),
            samples_table: self.clickhouse_samples_table.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure tests run serially and don't interfere with each other
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    const TOUCHED: &[&str] = &[
        "CANOPY_LOG_LEVEL",
        "CANOPY_NODE_ID",
        "CANOPY_WS_PORT",
        "CANOPY_MAILBOX_POLICY",
        "CANOPY_SAMPLE_EVERY",
        "CANOPY_DEVICE_SEEDS",
        "CANOPY_STORAGE_BACKEND",
    ];

    fn clear_env() {
        for key in TOUCHED {
            // SAFETY: Test runs with mutex lock to prevent concurrent env access
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.ws_address(), "0.0.0.0:8080");
        assert_eq!(config.mailbox_policy().unwrap(), MailboxPolicy::Evict);
        assert_eq!(config.storage_backend().unwrap(), StorageBackend::Memory);
        assert_eq!(config.session_config().sample_every, 10);
        assert_eq!(config.lease_config().ttl, Duration::from_secs(30));
        assert!(config.device_seeds().is_empty());
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::set_var("CANOPY_LOG_LEVEL", "debug");
            std::env::set_var("CANOPY_NODE_ID", "edge-7");
            std::env::set_var("CANOPY_WS_PORT", "9001");
            std::env::set_var("CANOPY_MAILBOX_POLICY", "reject");
            std::env::set_var("CANOPY_SAMPLE_EVERY", "3");
        }

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.node_id, "edge-7");
        assert_eq!(config.ws_port, 9001);
        assert_eq!(config.mailbox_policy().unwrap(), MailboxPolicy::Reject);
        assert_eq!(config.session_config().sample_every, 3);

        clear_env();
    }

    #[test]
    fn test_invalid_policy_and_backend_are_rejected() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::set_var("CANOPY_MAILBOX_POLICY", "queue");
            std::env::set_var("CANOPY_STORAGE_BACKEND", "sqlite");
        }

        let config = ServiceConfig::from_env().unwrap();
        assert!(config.mailbox_policy().is_err());
        assert!(config.storage_backend().is_err());

        clear_env();
    }

    #[test]
    fn test_device_seeds_parsing() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::set_var("CANOPY_DEVICE_SEEDS", "D1:Greenhouse probe, D2 ,,");
        }

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(
            config.device_seeds(),
            vec![
                DeviceSeed {
                    device_id: "D1".to_string(),
                    friendly_name: "Greenhouse probe".to_string(),
                },
                DeviceSeed {
                    device_id: "D2".to_string(),
                    friendly_name: "D2".to_string(),
                },
            ]
        );

        clear_env();
    }
}
