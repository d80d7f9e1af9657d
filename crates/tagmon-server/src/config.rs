use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tagmon_alert::limits::{LimitFile, LimitTable};
use tagmon_alert::LimitStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// JSON document mapping client id → {endpoint, namespace, tags}.
    #[serde(default = "default_fleet_path")]
    pub fleet_path: String,
    /// Directory of per-client limit documents (`<client_id>.json`).
    #[serde(default = "default_limits_dir")]
    pub limits_dir: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            fleet_path: default_fleet_path(),
            limits_dir: default_limits_dir(),
            database: default_database(),
            polling: PollingConfig::default(),
            alerting: AlertingConfig::default(),
            persistence: PersistenceConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_bucket_span_ms")]
    pub bucket_span_ms: i64,
    #[serde(default = "default_horizon_ms")]
    pub horizon_ms: i64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            bucket_span_ms: default_bucket_span_ms(),
            horizon_ms: default_horizon_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    /// Single source of truth for the dedup interval, shared by the
    /// engine's timestamp gate and the persisted alert store.
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: i64,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: default_dedup_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,
    /// Fixed delay between attempts; deliberately not exponential.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_ready_probe_delay_ms")]
    pub ready_probe_delay_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            write_attempts: default_write_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            ready_probe_delay_ms: default_ready_probe_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhooks: Vec<String>,
    #[serde(default = "default_min_severity")]
    pub min_severity: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhooks: Vec::new(),
            min_severity: default_min_severity(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_fleet_path() -> String {
    "config/fleet.json".to_string()
}

fn default_limits_dir() -> String {
    "config/limits".to_string()
}

fn default_database() -> String {
    "tagmon".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_bucket_span_ms() -> i64 {
    5_000
}

fn default_horizon_ms() -> i64 {
    60_000
}

fn default_dedup_window_ms() -> i64 {
    300_000
}

fn default_write_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_ready_probe_delay_ms() -> u64 {
    2_000
}

fn default_min_severity() -> String {
    "warning".to_string()
}

/// One device entry of the fleet document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub endpoint: String,
    #[serde(default = "default_namespace")]
    pub namespace: u16,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_namespace() -> u16 {
    2
}

/// Fleet document: client id → device entry, iterated in key order so the
/// derived fleet indices are deterministic.
pub type FleetFile = BTreeMap<String, DeviceEntry>;

/// Loads the fleet document. A missing or malformed file degrades to an
/// empty fleet rather than failing the process.
pub fn load_fleet(path: &str) -> FleetFile {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "Fleet document unreadable, starting empty");
            return FleetFile::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(fleet) => fleet,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "Fleet document malformed, starting empty");
            FleetFile::new()
        }
    }
}

/// File-backed limit store: one JSON document per client under the
/// configured directory, accepting both legacy shapes on read and always
/// writing the named-object form.
pub struct JsonLimitStore {
    dir: PathBuf,
}

impl JsonLimitStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, client_id: &str) -> PathBuf {
        self.dir.join(format!("{client_id}.json"))
    }
}

impl LimitStore for JsonLimitStore {
    fn load(&self, client_id: &str) -> Result<LimitTable> {
        let path = self.path_for(client_id);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        let file: LimitFile = serde_json::from_str(&content)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(LimitTable::from_file(file))
    }

    fn save(&self, client_id: &str, table: &LimitTable) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create {}", self.dir.display()))?;
        let path = self.path_for(client_id);
        let content = serde_json::to_string_pretty(&table.to_json())?;
        std::fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

/// Loads a client's limit table, degrading to empty on any failure. The
/// engine's auto-growth rebuilds placeholder entries from the tag list.
pub fn load_limits_or_empty(store: &dyn LimitStore, client_id: &str) -> LimitTable {
    match store.load(client_id) {
        Ok(table) => table,
        Err(e) => {
            tracing::warn!(
                client_id = %client_id,
                error = %e,
                "Limit document unavailable, starting with placeholders"
            );
            LimitTable::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagmon_common::types::DeviationKind;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.polling.interval_ms, 1_000);
        assert_eq!(config.alerting.dedup_window_ms, 300_000);
        assert_eq!(config.persistence.write_attempts, 3);
    }

    #[test]
    fn fleet_document_round_trips() {
        let json = r#"{
            "plc-01": {"endpoint": "opc.tcp://10.0.0.5:4840", "namespace": 2, "tags": ["1057", "1058"]},
            "plc-02": {"endpoint": "opc.tcp://10.0.0.6:4840"}
        }"#;
        let fleet: FleetFile = serde_json::from_str(json).unwrap();
        assert_eq!(fleet.len(), 2);
        assert_eq!(fleet["plc-01"].tags.len(), 2);
        assert_eq!(fleet["plc-02"].namespace, 2);
        assert!(fleet["plc-02"].tags.is_empty());
    }

    #[test]
    fn limit_store_round_trips_and_accepts_legacy_array() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLimitStore::new(dir.path());

        // Legacy array form on disk.
        std::fs::write(
            dir.path().join("plc-01.json"),
            r#"[{"SPAlarmH": 10, "Unit": "C"}]"#,
        )
        .unwrap();
        let table = store.load("plc-01").unwrap();
        assert_eq!(table.entry_at(0).unwrap().name, "Tag_01");
        assert_eq!(
            table.get("Tag_01").unwrap().threshold(DeviationKind::High),
            Some(10.0)
        );

        // Saved back in named-object form.
        let mut grown = table.clone();
        grown.grow_to(2);
        store.save("plc-01", &grown).unwrap();
        let reloaded = store.load("plc-01").unwrap();
        assert_eq!(reloaded, grown);
    }

    #[test]
    fn missing_limit_document_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLimitStore::new(dir.path());
        let table = load_limits_or_empty(&store, "plc-99");
        assert!(table.is_empty());
    }
}
