use anyhow::Result;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tagmon_alert::engine::AlertPolicy;
use tagmon_common::types::Severity;
use tagmon_notify::channels::webhook::WebhookChannel;
use tagmon_notify::manager::NotificationManager;
use tagmon_notify::store::{JsonlAlertStore, MemoryAlertStore};
use tagmon_notify::AlertStore;
use tagmon_protocol::sim::SimulatedDevice;
use tagmon_protocol::{NodeId, ProtocolClient};
use tagmon_server::config::{self, ServerConfig};
use tagmon_server::registry::{ClientRegistry, ProtocolFactory, RegistryConfig};
use tagmon_server::state::AppState;
use tagmon_server::app;
use tagmon_storage::jsonl::JsonlSink;
use tagmon_storage::retry::RetryingSink;
use tagmon_storage::DocumentSink;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tagmon_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tagmon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());

    let config = match ServerConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %config_path, error = %e, "Server config unavailable, using defaults");
            ServerConfig::default()
        }
    };

    tracing::info!(
        http_port = config.http_port,
        fleet = %config.fleet_path,
        data_dir = %config.data_dir,
        "tagmon-server starting"
    );

    // Persistence sink with fixed-delay write retries.
    let sink: Arc<dyn DocumentSink> = Arc::new(RetryingSink::new(
        Arc::new(JsonlSink::new(Path::new(&config.data_dir).join("readings"))),
        config.persistence.write_attempts,
        Duration::from_millis(config.persistence.retry_delay_ms),
    ));

    // Persisted alert store: the restart-surviving dedup layer.
    let alerts_path = Path::new(&config.data_dir).join("alerts.jsonl");
    let store: Arc<dyn AlertStore> =
        match JsonlAlertStore::open(&alerts_path, config.alerting.dedup_window_ms) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!(
                    path = %alerts_path.display(),
                    error = %e,
                    "Alert store unavailable, falling back to in-memory dedup"
                );
                Arc::new(MemoryAlertStore::new(config.alerting.dedup_window_ms))
            }
        };

    let min_severity = match config.notify.min_severity.parse::<Severity>() {
        Ok(severity) => severity,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid notify.min_severity, defaulting to warning");
            Severity::Warning
        }
    };
    let mut notifier = NotificationManager::new(store);
    for url in &config.notify.webhooks {
        notifier.add_channel(Box::new(WebhookChannel::new(url)), min_severity);
    }
    let notifier = Arc::new(notifier);

    let limit_store = Arc::new(config::JsonLimitStore::new(&config.limits_dir));

    let registry = Arc::new(ClientRegistry::new(
        sink,
        notifier,
        limit_store,
        RegistryConfig {
            database: config.database.clone(),
            poll_interval_ms: config.polling.interval_ms,
            bucket_span_ms: config.polling.bucket_span_ms,
            horizon_ms: config.polling.horizon_ms,
            policy: AlertPolicy {
                dedup_window_ms: config.alerting.dedup_window_ms,
            },
        },
    ));

    // Gate the first protocol connections on the backend answering.
    tokio::spawn(registry.clone().run_readiness_probe(Duration::from_millis(
        config.persistence.ready_probe_delay_ms,
    )));

    // The wire protocol stack is an external concern; the bundled backend
    // is the in-process simulator, seeded with the configured tag set.
    let factory: ProtocolFactory = Box::new(|_id, entry| {
        let device = SimulatedDevice::new(entry.namespace);
        let handle = device.handle();
        for raw in &entry.tags {
            handle.set(NodeId::from_raw(raw, entry.namespace).address, 0.0);
        }
        Box::new(device) as Box<dyn ProtocolClient>
    });

    let fleet = config::load_fleet(&config.fleet_path);
    tracing::info!(clients = fleet.len(), "Fleet loaded");
    registry.load_fleet(&fleet, &factory).await;
    registry.connect_all().await;

    let state = AppState::new(registry);
    let router = app::build_http_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
