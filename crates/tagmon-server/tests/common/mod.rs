use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tagmon_alert::engine::AlertPolicy;
use tagmon_alert::limits::LimitTable;
use tagmon_alert::LimitStore;
use tagmon_common::types::Severity;
use tagmon_notify::manager::NotificationManager;
use tagmon_notify::store::MemoryAlertStore;
use tagmon_notify::NotificationChannel;
use tagmon_protocol::sim::{DeviceHandle, SimulatedDevice};
use tagmon_protocol::ProtocolClient;
use tagmon_server::registry::{ClientRegistry, ProtocolFactory, RegistryConfig};
use tagmon_storage::memory::MemorySink;

pub struct RecordingChannel {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
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
pub struct InMemoryLimitStore {
    pub tables: Mutex<HashMap<String, LimitTable>>,
}

impl LimitStore for InMemoryLimitStore {
    fn load(&self, client_id: &str) -> Result<LimitTable> {
        self.tables
            .lock()
            .unwrap()
            .get(client_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no limits for {client_id}"))
    }

    fn save(&self, client_id: &str, table: &LimitTable) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .insert(client_id.to_string(), table.clone());
        Ok(())
    }
}

pub struct TestFixture {
    pub registry: Arc<ClientRegistry>,
    pub sink: Arc<MemorySink>,
    pub store: Arc<MemoryAlertStore>,
    pub limit_store: Arc<InMemoryLimitStore>,
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
    pub devices: HashMap<String, DeviceHandle>,
}

/// Builds a registry over in-memory collaborators plus one simulated
/// device per id, with a fast poll interval for test turnaround. The
/// returned factory hands each prepared device out by client id.
pub fn fixture(device_ids: &[&str]) -> (TestFixture, ProtocolFactory) {
    let sink = Arc::new(MemorySink::new());
    let store = Arc::new(MemoryAlertStore::new(300_000));
    let sent = Arc::new(Mutex::new(Vec::new()));
    let mut notifier = NotificationManager::new(store.clone());
    notifier.add_channel(
        Box::new(RecordingChannel { sent: sent.clone() }),
        Severity::Info,
    );
    let limit_store = Arc::new(InMemoryLimitStore::default());

    let registry = Arc::new(ClientRegistry::new(
        sink.clone(),
        Arc::new(notifier),
        limit_store.clone(),
        RegistryConfig {
            database: "tagmon".to_string(),
            poll_interval_ms: 20,
            bucket_span_ms: 5_000,
            horizon_ms: 60_000,
            policy: AlertPolicy::default(),
        },
    ));

    let mut devices = HashMap::new();
    let mut pending = HashMap::new();
    for id in device_ids {
        let device = SimulatedDevice::new(2);
        devices.insert(id.to_string(), device.handle());
        pending.insert(id.to_string(), device);
    }

    let pending = Mutex::new(pending);
    let factory: ProtocolFactory = Box::new(move |id, _entry| {
        Box::new(
            pending
                .lock()
                .unwrap()
                .remove(id)
                .expect("no simulated device prepared for this id"),
        ) as Box<dyn ProtocolClient>
    });

    (
        TestFixture {
            registry,
            sink,
            store,
            limit_store,
            sent,
            devices,
        },
        factory,
    )
}
