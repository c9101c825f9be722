mod config;

use anyhow::Context;
use canopy_runner::Runner;
use common::clickhouse::{ClickHouseClient, ClickHouseSampleRepository};
use common::domain::{DeviceId, DeviceRepository, SampleRepository};
use common::memory::{InMemoryDeviceRepository, InMemorySampleRepository};
use common::nats::NatsClient;
use common::postgres::{ensure_device_schema, PostgresClient, PostgresDeviceRepository};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryProviders};
use config::{ServiceConfig, StorageBackend};
use device_gateway::{DeviceServer, SessionContext};
use mailbox_router::{serve_fabric, MailboxRouter, NatsFabric, NatsRoutingTable, NodeId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

struct Storage {
    devices: Arc<dyn DeviceRepository>,
    samples: Arc<dyn SampleRepository>,
}

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> =
        match init_telemetry(&config.telemetry_config()) {
            Ok(providers) => providers,
            Err(e) => {
                eprintln!("Failed to initialize telemetry: {}", e);
                std::process::exit(1);
            }
        };

    info!(
        node_id = %config.node_id,
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "Starting canopy node"
    );
    debug!("Configuration: {:?}", config);

    let (policy, backend) = match (config.mailbox_policy(), config.storage_backend()) {
        (Ok(policy), Ok(backend)) => (policy, backend),
        (Err(e), _) | (_, Err(e)) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let storage = match initialize_storage(&config, backend).await {
        Ok(storage) => storage,
        Err(e) => {
            error!("Failed to initialize storage: {:#}", e);
            std::process::exit(1);
        }
    };

    info!("Initializing NATS...");
    let nats_client = match initialize_nats(&config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to initialize NATS: {:#}", e);
            std::process::exit(1);
        }
    };

    let routing_store = match nats_client
        .ensure_kv_bucket(&config.routing_bucket, config.lease_config().ttl)
        .await
    {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize routing bucket: {:#}", e);
            std::process::exit(1);
        }
    };

    let node_id = NodeId::new(config.node_id.clone());
    let router = Arc::new(MailboxRouter::new(
        node_id,
        policy,
        Arc::new(NatsRoutingTable::new(routing_store)),
        Arc::new(NatsFabric::new(
            nats_client.client().clone(),
            config.fabric_subject_prefix.clone(),
            Duration::from_millis(config.fabric_request_timeout_ms),
        )),
    ));
    info!(node_id = %router.node_id(), policy = %router.policy(), "mailbox router ready");

    let session_ctx = SessionContext {
        router: router.clone(),
        devices: storage.devices,
        samples: storage.samples,
        config: config.session_config(),
    };
    let device_server = match DeviceServer::bind(
        &config.ws_address(),
        session_ctx,
        Duration::from_secs(config.session_drain_timeout_secs),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start device listener: {:#}", e);
            std::process::exit(1);
        }
    };

    let renewal_interval = config.lease_config().renewal_interval;

    Runner::new()
        .with_named_process("routing_server", {
            let client = nats_client.client().clone();
            let prefix = config.fabric_subject_prefix.clone();
            let server = router.server();
            move |token| serve_fabric(client, prefix, server, token)
        })
        .with_named_process("lease_renewal", {
            let server = router.server();
            move |token| server.run_lease_renewal(renewal_interval, token)
        })
        .with_named_process("device_server", move |token| device_server.run(token))
        .with_closer("release_mailboxes", {
            let server = router.server();
            move || async move {
                let released = server.release_all().await;
                if released > 0 {
                    warn!(released, "released mailboxes left open after session drain");
                }
                Ok(())
            }
        })
        .with_closer("nats", move || async move {
            nats_client.close().await;
            Ok(())
        })
        .with_closer("telemetry", move || async move {
            info!("Cleanup complete");
            shutdown_telemetry(telemetry_providers);
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10))
        .run_until_exit()
        .await;
}

async fn initialize_storage(
    config: &ServiceConfig,
    backend: StorageBackend,
) -> anyhow::Result<Storage> {
    match backend {
        StorageBackend::Memory => {
            info!("Initializing in-memory storage...");
            let devices = InMemoryDeviceRepository::new();
            for seed in config.device_seeds() {
                let device_id = DeviceId::parse(&seed.device_id)
                    .with_context(|| format!("invalid seeded device id '{}'", seed.device_id))?;
                devices.register(device_id, &seed.friendly_name)?;
            }
            info!(devices = devices.count(), "seeded devices");
            Ok(Storage {
                devices: Arc::new(devices),
                samples: Arc::new(InMemorySampleRepository::new()),
            })
        }
        StorageBackend::PostgresClickhouse => {
            info!("Initializing PostgreSQL...");
            let postgres_client = PostgresClient::new(&config.postgres_config())?;
            ensure_device_schema(&postgres_client).await?;

            info!("Initializing ClickHouse...");
            let clickhouse_config = config.clickhouse_config();
            let clickhouse_client = ClickHouseClient::new(&clickhouse_config);
            clickhouse_client
                .ping()
                .await
                .context("failed to reach ClickHouse")?;
            let samples =
                ClickHouseSampleRepository::new(clickhouse_client, clickhouse_config.samples_table);
            samples.ensure_table().await?;

            Ok(Storage {
                devices: Arc::new(PostgresDeviceRepository::new(postgres_client)),
                samples: Arc::new(samples),
            })
        }
    }
}

async fn initialize_nats(config: &ServiceConfig) -> anyhow::Result<NatsClient> {
    NatsClient::connect(
        &config.nats_url,
        Duration::from_secs(config.startup_timeout_secs),
    )
    .await
}
