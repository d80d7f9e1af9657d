use crate::config::{load_limits_or_empty, DeviceEntry, FleetFile};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tagmon_alert::dedup::DedupStore;
use tagmon_alert::engine::AlertPolicy;
use tagmon_alert::LimitStore;
use tagmon_client::gate::{readiness, ReadinessGate, ReadinessSignal};
use tagmon_client::metrics::MetricsWindow;
use tagmon_client::{ClientConfig, ClientDeps, DeviceClient, TelemetrySnapshot};
use tagmon_common::types::{AlertStatSnapshot, ClientStatus};
use tagmon_notify::manager::NotificationManager;
use tagmon_protocol::{BrowseItem, ProtocolClient};
use tagmon_storage::{DocumentSink, WriteDestination};
use tokio::sync::RwLock;

/// Registry-level knobs distilled from the server configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub database: String,
    pub poll_interval_ms: u64,
    pub bucket_span_ms: i64,
    pub horizon_ms: i64,
    pub policy: AlertPolicy,
}

/// Factory producing a protocol client for a device entry. Injected so the
/// registry never depends on a concrete protocol stack.
pub type ProtocolFactory =
    Box<dyn Fn(&str, &DeviceEntry) -> Box<dyn ProtocolClient> + Send + Sync>;

struct Entry {
    client: Arc<DeviceClient>,
    index: usize,
}

/// Fleet-wide rollup for the dashboard landing view.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct FleetOverview {
    pub clients_total: usize,
    pub clients_connected: usize,
    pub reads_total: u64,
    pub alert_occurrences: u64,
    pub notification_channels: usize,
}

/// Owns the per-device clients and the cross-cutting context: the shared
/// dedup store, the one-shot readiness gate, and the collaborator handles
/// each client is constructed with. Clients never see the registry itself.
pub struct ClientRegistry {
    clients: RwLock<BTreeMap<String, Entry>>,
    next_index: AtomicUsize,
    dedup: DedupStore,
    signal: ReadinessSignal,
    gate: ReadinessGate,
    sink: Arc<dyn DocumentSink>,
    notifier: Arc<NotificationManager>,
    limit_store: Arc<dyn LimitStore>,
    config: RegistryConfig,
}

impl ClientRegistry {
    pub fn new(
        sink: Arc<dyn DocumentSink>,
        notifier: Arc<NotificationManager>,
        limit_store: Arc<dyn LimitStore>,
        config: RegistryConfig,
    ) -> Self {
        let (signal, gate) = readiness();
        Self {
            clients: RwLock::new(BTreeMap::new()),
            next_index: AtomicUsize::new(0),
            dedup: DedupStore::new(),
            signal,
            gate,
            sink,
            notifier,
            limit_store,
            config,
        }
    }

    pub fn gate(&self) -> ReadinessGate {
        self.gate.clone()
    }

    /// Creates clients for every fleet entry, in key order so derived
    /// persistence coordinates are stable across restarts.
    pub async fn load_fleet(&self, fleet: &FleetFile, factory: &ProtocolFactory) {
        for (id, entry) in fleet {
            self.insert(id, entry, factory(id, entry)).await;
        }
    }

    /// Instantiates one client from configuration. Replaces (after
    /// disconnecting) any existing client with the same id.
    pub async fn insert(&self, id: &str, entry: &DeviceEntry, protocol: Box<dyn ProtocolClient>) {
        let replaced = self.clients.write().await.remove(id);
        if let Some(old) = replaced {
            tracing::info!(client_id = %id, "Replacing existing client");
            old.client.disconnect().await;
        }

        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let limits = load_limits_or_empty(self.limit_store.as_ref(), id);

        let client = DeviceClient::new(
            ClientConfig {
                id: id.to_string(),
                endpoint: entry.endpoint.clone(),
                namespace: entry.namespace,
                tags: entry.tags.clone(),
                poll_interval_ms: self.config.poll_interval_ms,
            },
            limits,
            protocol,
            ClientDeps {
                sink: self.sink.clone(),
                notifier: self.notifier.clone(),
                limit_store: self.limit_store.clone(),
                gate: self.gate.clone(),
            },
            self.dedup.clone(),
            self.config.policy,
            MetricsWindow::new(self.config.bucket_span_ms, self.config.horizon_ms),
        );

        if self.signal.is_fired() {
            client.set_destination(WriteDestination::for_index(&self.config.database, index));
        }

        tracing::info!(
            client_id = %id,
            endpoint = %entry.endpoint,
            tags = entry.tags.len(),
            index,
            "Client registered"
        );

        self.clients.write().await.insert(
            id.to_string(),
            Entry {
                client: Arc::new(client),
                index,
            },
        );
    }

    /// Disconnects and drops a client. Returns false for unknown ids.
    pub async fn remove(&self, id: &str) -> bool {
        let entry = self.clients.write().await.remove(id);
        match entry {
            Some(entry) => {
                entry.client.disconnect().await;
                tracing::info!(client_id = %id, "Client removed");
                true
            }
            None => false,
        }
    }

    /// Kicks off connection attempts for every client concurrently.
    /// Attempts block on the readiness gate and absorb their own failures.
    pub async fn connect_all(&self) {
        let clients = self.clients.read().await;
        for entry in clients.values() {
            let client = entry.client.clone();
            tokio::spawn(async move { client.connect().await });
        }
    }

    pub async fn connect_one(&self, id: &str) -> bool {
        let client = self.get(id).await;
        match client {
            Some(client) => {
                tokio::spawn(async move { client.connect().await });
                true
            }
            None => false,
        }
    }

    pub async fn disconnect_one(&self, id: &str) -> bool {
        match self.get(id).await {
            Some(client) => {
                client.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Fires the one-shot readiness gate and hands every client its
    /// persistence coordinates. Later calls are no-ops for the gate but
    /// still top up destinations for clients added since.
    pub async fn mark_storage_ready(&self) {
        // Destinations first: a client woken by the gate must never run its
        // first cycle against unassigned coordinates.
        let clients = self.clients.read().await;
        for entry in clients.values() {
            entry
                .client
                .set_destination(WriteDestination::for_index(&self.config.database, entry.index));
        }
        self.signal.fire();
        tracing::info!(clients = clients.len(), "Persistence backend ready, gate open");
    }

    /// Polls the sink until it answers, then opens the gate. Fixed-delay
    /// probing, consistent with the per-write retry policy.
    pub async fn run_readiness_probe(self: Arc<Self>, delay: std::time::Duration) {
        loop {
            match self.sink.ping().await {
                Ok(()) => {
                    self.mark_storage_ready().await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Persistence backend not ready yet");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn get(&self, id: &str) -> Option<Arc<DeviceClient>> {
        self.clients.read().await.get(id).map(|e| e.client.clone())
    }

    pub async fn client_ids(&self) -> Vec<String> {
        self.clients.read().await.keys().cloned().collect()
    }

    pub async fn status_all(&self) -> Vec<ClientStatus> {
        let clients = self.clients.read().await;
        clients.values().map(|e| e.client.status()).collect()
    }

    pub async fn status(&self, id: &str) -> Option<ClientStatus> {
        Some(self.get(id).await?.status())
    }

    pub async fn telemetry(&self, id: &str, now: DateTime<Utc>) -> Option<TelemetrySnapshot> {
        Some(self.get(id).await?.telemetry(now))
    }

    pub async fn alert_stats(&self, id: &str) -> Option<Vec<AlertStatSnapshot>> {
        Some(self.get(id).await?.alert_stats())
    }

    pub async fn browse(&self, id: &str, node: &str) -> Option<Result<Vec<BrowseItem>>> {
        Some(self.get(id).await?.browse(node).await)
    }

    pub async fn overview(&self) -> FleetOverview {
        let statuses = self.status_all().await;
        let alert_occurrences = {
            let clients = self.clients.read().await;
            let mut total = 0u64;
            for entry in clients.values() {
                total += entry
                    .client
                    .alert_stats()
                    .iter()
                    .map(|s| s.occurrences)
                    .sum::<u64>();
            }
            total
        };
        FleetOverview {
            clients_total: statuses.len(),
            clients_connected: statuses.iter().filter(|s| s.connected).count(),
            reads_total: statuses.iter().map(|s| s.reads_total).sum(),
            alert_occurrences,
            notification_channels: self.notifier.channel_count(),
        }
    }
}
