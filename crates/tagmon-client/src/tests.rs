use crate::gate::{readiness, ReadinessGate};
use crate::metrics::MetricsWindow;
use crate::{ClientConfig, ClientDeps, DeviceClient};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tagmon_alert::dedup::DedupStore;
use tagmon_alert::engine::AlertPolicy;
use tagmon_alert::limits::{LimitFile, LimitTable};
use tagmon_alert::LimitStore;
use tagmon_notify::manager::NotificationManager;
use tagmon_notify::store::MemoryAlertStore;
use tagmon_notify::NotificationChannel;
use tagmon_protocol::sim::{DeviceHandle, SimulatedDevice};
use tagmon_protocol::{NodeAddress, SessionEvent};
use tagmon_storage::memory::MemorySink;
use tagmon_storage::WriteDestination;
use tagmon_common::types::{ConnectionState, Severity};

struct RecordingChannel {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "recording"
    }
}

#[derive(Default)]
struct TestLimitStore {
    saved: Mutex<Option<LimitTable>>,
}

impl LimitStore for TestLimitStore {
    fn load(&self, _client_id: &str) -> Result<LimitTable> {
        Ok(LimitTable::default())
    }

    fn save(&self, _client_id: &str, table: &LimitTable) -> Result<()> {
        *self.saved.lock().unwrap() = Some(table.clone());
        Ok(())
    }
}

struct Harness {
    client: DeviceClient,
    device: DeviceHandle,
    sink: Arc<MemorySink>,
    store: Arc<MemoryAlertStore>,
    limit_store: Arc<TestLimitStore>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

fn harness(tags: &[&str], limits_json: &str, interval_ms: u64, gate: ReadinessGate) -> Harness {
    let device = SimulatedDevice::new(2);
    let handle = device.handle();

    let sink = Arc::new(MemorySink::new());
    let store = Arc::new(MemoryAlertStore::new(300_000));
    let sent = Arc::new(Mutex::new(Vec::new()));
    let mut notifier = NotificationManager::new(store.clone());
    notifier.add_channel(
        Box::new(RecordingChannel { sent: sent.clone() }),
        Severity::Info,
    );
    let limit_store = Arc::new(TestLimitStore::default());

    let limits = if limits_json.is_empty() {
        LimitTable::default()
    } else {
        LimitTable::from_file(serde_json::from_str::<LimitFile>(limits_json).unwrap())
    };

    let client = DeviceClient::new(
        ClientConfig {
            id: "plc-01".to_string(),
            endpoint: "sim://plc-01".to_string(),
            namespace: 2,
            tags: tags.iter().map(|s| s.to_string()).collect(),
            poll_interval_ms: interval_ms,
        },
        limits,
        Box::new(device),
        ClientDeps {
            sink: sink.clone(),
            notifier: Arc::new(notifier),
            limit_store: limit_store.clone(),
            gate,
        },
        DedupStore::new(),
        AlertPolicy::default(),
        MetricsWindow::default(),
    );
    client.set_destination(WriteDestination::for_index("tagmon", 0));

    Harness {
        client,
        device: handle,
        sink,
        store,
        limit_store,
        sent,
    }
}

#[tokio::test]
async fn connect_blocks_on_gate_then_proceeds() {
    let (signal, gate) = readiness();
    let h = harness(&["1057"], "", 50, gate);
    h.device.set(NodeAddress::Numeric(1057), 1.0);

    let client = Arc::new(h.client);
    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());
    assert_eq!(client.status().state, ConnectionState::Connecting);

    signal.fire();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("connect never completed")
        .unwrap();
    assert!(client.status().connected);

    // Second connect while connected is an immediate no-op.
    tokio::time::timeout(Duration::from_millis(100), client.connect())
        .await
        .expect("repeat connect blocked");
    assert!(client.status().connected);
    client.disconnect().await;
}

#[tokio::test]
async fn connect_failure_is_absorbed_into_status() {
    let h = harness(&["1057"], "", 50, ReadinessGate::open());
    h.device.fail_next_connects(1);

    h.client.connect().await;
    let status = h.client.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.last_error.unwrap().contains("refused"));

    // Next attempt succeeds.
    h.client.connect().await;
    assert!(h.client.status().connected);
    h.client.disconnect().await;
}

#[tokio::test]
async fn cycles_read_persist_and_aggregate() {
    let h = harness(&["1057", "1058"], "", 20, ReadinessGate::open());
    h.device.set(NodeAddress::Numeric(1057), 42.5);
    h.device.set(NodeAddress::Numeric(1058), 7.0);

    h.client.connect().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    h.client.disconnect().await;

    let status = h.client.status();
    assert!(status.reads_total >= 2, "reads_total = {}", status.reads_total);
    assert!(status.last_latency_ms.is_some());
    assert!(status.failures.is_empty());

    let dest = WriteDestination::for_index("tagmon", 0);
    let docs = h.sink.documents(&dest);
    assert!(!docs.is_empty());
    assert_eq!(docs[0].values.get("ns=2;i=1057"), Some(&42.5));
    assert_eq!(docs[0].values.get("ns=2;i=1058"), Some(&7.0));

    let telemetry = h.client.telemetry(Utc::now());
    assert!(telemetry.summary.reads_per_sec > 0.0);
    assert!(telemetry.summary.writes_per_sec > 0.0);
    assert_eq!(telemetry.summary.bad_pct, 0.0);
}

#[tokio::test]
async fn breach_fires_once_and_grows_short_table() {
    let h = harness(
        &["1057", "1058"],
        r#"{"Tag_01": {"SPAlarmH": 10, "Unit": "C"}}"#,
        20,
        ReadinessGate::open(),
    );
    h.device.set(NodeAddress::Numeric(1057), 12.0);
    h.device.set(NodeAddress::Numeric(1058), 5.0);

    h.client.connect().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    h.client.disconnect().await;

    // Several cycles ran; dedup (engine gate + persisted layer) holds the
    // outbound count at one.
    assert_eq!(h.store.records().len(), 1);
    assert_eq!(h.sent.lock().unwrap().len(), 1);
    let (subject, body) = h.sent.lock().unwrap()[0].clone();
    assert!(subject.contains("Tag_01"));
    assert!(body.contains("above high limit"));

    // The short table grew to match the tag list and was persisted back.
    let saved = h.limit_store.saved.lock().unwrap().clone().unwrap();
    assert_eq!(saved.len(), 2);

    let stats = h.client.alert_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].tag, "Tag_01");
    assert!(stats[0].occurrences >= 1);
    assert!(stats[0].last_sent.contains_key("high"));
}

#[tokio::test]
async fn degraded_quality_shows_in_bad_pct() {
    let h = harness(&["1057"], "", 20, ReadinessGate::open());
    h.device
        .set_with_status(NodeAddress::Numeric(1057), 0.0, "BadSensorFailure");

    h.client.connect().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.client.disconnect().await;

    let telemetry = h.client.telemetry(Utc::now());
    assert_eq!(telemetry.summary.bad_pct, 100.0);
}

#[tokio::test]
async fn unknown_tag_counts_failures_without_aborting_cycle() {
    let h = harness(&["1057", "9999"], "", 20, ReadinessGate::open());
    h.device.set(NodeAddress::Numeric(1057), 1.0);

    h.client.connect().await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    h.client.disconnect().await;

    let status = h.client.status();
    // The healthy tag kept reading.
    assert!(status.reads_total >= 1);
    assert!(*status.failures.get("9999").unwrap() >= 1);
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn slow_cycles_skip_ticks_instead_of_overlapping() {
    let h = harness(&["1057"], "", 10, ReadinessGate::open());
    h.device.set(NodeAddress::Numeric(1057), 1.0);
    h.device.set_read_delay(Duration::from_millis(80));

    h.client.connect().await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    h.client.disconnect().await;

    let status = h.client.status();
    assert!(status.skipped_ticks > 0, "expected skipped ticks");
}

#[tokio::test]
async fn disconnect_stops_polling_and_records_session() {
    let h = harness(&["1057"], "", 20, ReadinessGate::open());
    h.device.set(NodeAddress::Numeric(1057), 1.0);

    h.client.connect().await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    h.client.disconnect().await;

    let status = h.client.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.active_tags, 0);
    assert!(status.session_secs.is_some());

    let reads_after_stop = status.reads_total;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(h.client.status().reads_total, reads_after_stop);
}

#[tokio::test]
async fn session_events_surface_in_telemetry() {
    let h = harness(&["1057"], "", 1_000, ReadinessGate::open());
    h.device.set(NodeAddress::Numeric(1057), 1.0);

    h.client.connect().await;
    assert!(h.device.emit(SessionEvent::Backoff));
    assert!(h.device.emit(SessionEvent::Reconnected));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let telemetry = h.client.telemetry(Utc::now());
    assert_eq!(telemetry.reconnect_events_10m, 2);
    h.client.disconnect().await;
}

#[tokio::test]
async fn browse_lists_the_simulated_address_space() {
    let h = harness(&["1057"], "", 1_000, ReadinessGate::open());
    h.device.set(NodeAddress::Numeric(1057), 1.0);

    h.client.connect().await;
    let items = h.client.browse("85").await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].node, "ns=2;i=1057");
    h.client.disconnect().await;

    assert!(h.client.browse("85").await.is_err());
}
