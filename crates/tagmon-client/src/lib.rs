//! Per-device polling core: connection lifecycle, scheduled read cycles,
//! windowed telemetry, and alert evaluation hand-off.
//!
//! A [`DeviceClient`] owns exactly one protocol session and is constructed
//! with narrow collaborator capabilities (document sink, notification
//! manager, limit store, readiness gate) rather than a registry handle.
//! All mutation of a client's buckets and alert state happens from its own
//! read cycle or lifecycle calls.

pub mod gate;
pub mod metrics;

mod cycle;
mod scheduler;
mod supervisor;

#[cfg(test)]
mod tests;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use scheduler::PollingScheduler;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tagmon_alert::dedup::DedupStore;
use tagmon_alert::engine::{AlertEngine, AlertPolicy};
use tagmon_alert::limits::LimitTable;
use tagmon_alert::LimitStore;
use tagmon_common::types::{AlertStatSnapshot, ClientStatus, ConnectionState};
use tagmon_notify::manager::NotificationManager;
use tagmon_protocol::{BrowseItem, NodeId, ProtocolClient, SessionEvent};
use tagmon_storage::{DocumentSink, WriteDestination};

use gate::ReadinessGate;
use metrics::{BucketRate, MetricsSummary, MetricsWindow, SERIES_LEN};

/// Static per-device configuration. Tag order is semantically significant:
/// it is the join key to the limit table.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub id: String,
    pub endpoint: String,
    pub namespace: u16,
    pub tags: Vec<String>,
    pub poll_interval_ms: u64,
}

/// Collaborators injected at construction. The sink is expected to carry
/// its own retry behavior already.
pub struct ClientDeps {
    pub sink: Arc<dyn DocumentSink>,
    pub notifier: Arc<NotificationManager>,
    pub limit_store: Arc<dyn LimitStore>,
    pub gate: ReadinessGate,
}

/// Trailing window for reconnect-event counting in telemetry snapshots.
const RECONNECT_WINDOW_MS: i64 = 600_000;

pub(crate) struct LifecycleState {
    pub connection: ConnectionState,
    pub session_started_at: Option<DateTime<Utc>>,
    pub last_session_at: Option<DateTime<Utc>>,
    pub session_secs: Option<i64>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<f64>,
    pub reads_total: u64,
    pub skipped_ticks: u64,
    pub failures: HashMap<String, u64>,
    pub last_error: Option<String>,
}

impl LifecycleState {
    fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            session_started_at: None,
            last_session_at: None,
            session_secs: None,
            last_read_at: None,
            last_latency_ms: None,
            reads_total: 0,
            skipped_ticks: 0,
            failures: HashMap::new(),
            last_error: None,
        }
    }
}

pub(crate) struct ClientInner {
    pub config: ClientConfig,
    pub protocol: tokio::sync::Mutex<Box<dyn ProtocolClient>>,
    pub state: Mutex<LifecycleState>,
    pub metrics: Mutex<MetricsWindow>,
    pub engine: Mutex<AlertEngine>,
    pub events: Mutex<VecDeque<(DateTime<Utc>, SessionEvent)>>,
    pub destination: Mutex<Option<WriteDestination>>,
    pub resolved_paths: Mutex<HashMap<String, NodeId>>,
    pub in_flight: AtomicBool,
    pub deps: ClientDeps,
    pub scheduler: PollingScheduler,
    pub events_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ClientInner {
    pub(crate) fn is_connected(&self) -> bool {
        self.lock_state().connection == ConnectionState::Connected
    }

    pub(crate) fn lock_state(&self) -> std::sync::MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Compact telemetry snapshot for dashboards: horizon summary, short
/// bucket series, and recent connection-stability signal.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct TelemetrySnapshot {
    pub client_id: String,
    pub summary: MetricsSummary,
    pub series: Vec<BucketRate>,
    /// Protocol backoff/reconnected events within the trailing 10 minutes.
    pub reconnect_events_10m: usize,
}

/// One device's polling client. Cheap to clone-share via the registry;
/// all methods are safe to call concurrently with a running cycle.
pub struct DeviceClient {
    inner: Arc<ClientInner>,
}

impl DeviceClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ClientConfig,
        limits: LimitTable,
        protocol: Box<dyn ProtocolClient>,
        deps: ClientDeps,
        dedup: DedupStore,
        policy: AlertPolicy,
        window: MetricsWindow,
    ) -> Self {
        let engine = AlertEngine::new(config.id.clone(), limits, dedup, policy);
        Self {
            inner: Arc::new(ClientInner {
                config,
                protocol: tokio::sync::Mutex::new(protocol),
                state: Mutex::new(LifecycleState::new()),
                metrics: Mutex::new(window),
                engine: Mutex::new(engine),
                events: Mutex::new(VecDeque::new()),
                destination: Mutex::new(None),
                resolved_paths: Mutex::new(HashMap::new()),
                in_flight: AtomicBool::new(false),
                deps,
                scheduler: PollingScheduler::new(),
                events_task: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    /// Connects and starts polling. Failures are absorbed into the status
    /// snapshot; calling while connecting or connected is a no-op.
    pub async fn connect(&self) {
        supervisor::connect(self.inner.clone()).await;
    }

    /// Stops the scheduler, closes the session, records session duration.
    pub async fn disconnect(&self) {
        supervisor::disconnect(&self.inner).await;
    }

    /// Assigns the persistence coordinates once a backend is reachable.
    pub fn set_destination(&self, destination: WriteDestination) {
        *self
            .inner
            .destination
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(destination);
    }

    pub fn status(&self) -> ClientStatus {
        let state = self.inner.lock_state();
        let connected = state.connection == ConnectionState::Connected;
        let session_secs = match (connected, state.session_started_at) {
            (true, Some(started)) => Some((Utc::now() - started).num_seconds()),
            _ => state.session_secs,
        };
        ClientStatus {
            client_id: self.inner.config.id.clone(),
            endpoint: self.inner.config.endpoint.clone(),
            state: state.connection,
            connected,
            active_tags: self.inner.scheduler.active_tags(),
            last_session_at: state.last_session_at,
            session_secs,
            last_read_at: state.last_read_at,
            last_latency_ms: state.last_latency_ms,
            reads_total: state.reads_total,
            skipped_ticks: state.skipped_ticks,
            failures: state.failures.clone(),
            last_error: state.last_error.clone(),
        }
    }

    pub fn telemetry(&self, now: DateTime<Utc>) -> TelemetrySnapshot {
        let (summary, series) = {
            let metrics = self.inner.metrics.lock().unwrap_or_else(|p| p.into_inner());
            (
                metrics.summarize(metrics.horizon_ms(), now),
                metrics.series(SERIES_LEN),
            )
        };
        let reconnects = {
            let events = self.inner.events.lock().unwrap_or_else(|p| p.into_inner());
            let cutoff = now - Duration::milliseconds(RECONNECT_WINDOW_MS);
            events.iter().filter(|(at, _)| *at >= cutoff).count()
        };
        TelemetrySnapshot {
            client_id: self.inner.config.id.clone(),
            summary,
            series,
            reconnect_events_10m: reconnects,
        }
    }

    pub fn alert_stats(&self) -> Vec<AlertStatSnapshot> {
        self.inner
            .engine
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .stats_snapshot()
    }

    /// Browses the device address space under `node` (raw identifier
    /// form). Requires a connected session.
    pub async fn browse(&self, node: &str) -> Result<Vec<BrowseItem>> {
        if !self.inner.is_connected() {
            anyhow::bail!("client {} is not connected", self.inner.config.id);
        }
        let node = NodeId::from_raw(node, self.inner.config.namespace);
        let mut protocol = self.inner.protocol.lock().await;
        protocol.browse(&node).await
    }
}

impl Drop for DeviceClient {
    fn drop(&mut self) {
        // Registry removal disconnects first; this is the backstop so a
        // dropped client never leaves a timer running.
        self.inner.scheduler.stop();
        if let Some(task) = self
            .inner
            .events_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            task.abort();
        }
    }
}
