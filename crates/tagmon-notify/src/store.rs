use crate::{AlertStore, PersistOutcome};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tagmon_common::types::{AlertRecord, DeviationKind};

type StoreKey = (String, String, DeviationKind);

fn key_of(record: &AlertRecord) -> StoreKey {
    (record.client_id.clone(), record.tag.clone(), record.kind)
}

/// In-memory alert store for tests and single-process setups. Applies the
/// same per-(client, tag, kind) window as the engine's timestamp gate.
pub struct MemoryAlertStore {
    window: Duration,
    seen: Mutex<HashMap<StoreKey, DateTime<Utc>>>,
    records: Mutex<Vec<AlertRecord>>,
}

impl MemoryAlertStore {
    pub fn new(dedup_window_ms: i64) -> Self {
        Self {
            window: Duration::milliseconds(dedup_window_ms),
            seen: Mutex::new(HashMap::new()),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<AlertRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn try_persist(&self, record: &AlertRecord) -> Result<PersistOutcome> {
        let mut seen = self.seen.lock().unwrap();
        if let Some(last) = seen.get(&key_of(record)) {
            if record.timestamp - *last < self.window {
                return Ok(PersistOutcome::Duplicate);
            }
        }
        seen.insert(key_of(record), record.timestamp);
        self.records.lock().unwrap().push(record.clone());
        Ok(PersistOutcome::Accepted)
    }
}

/// File-backed alert store appending one JSON line per accepted record.
///
/// On startup the existing file is replayed to rebuild the dedup index, so
/// a restarted process does not re-notify breaches it already reported
/// within the window.
pub struct JsonlAlertStore {
    path: PathBuf,
    window: Duration,
    seen: Mutex<HashMap<StoreKey, DateTime<Utc>>>,
}

impl JsonlAlertStore {
    pub fn open(path: impl Into<PathBuf>, dedup_window_ms: i64) -> crate::error::Result<Self> {
        let path = path.into();
        let mut seen: HashMap<StoreKey, DateTime<Utc>> = HashMap::new();

        if path.exists() {
            let file = std::fs::File::open(&path)?;
            for line in std::io::BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AlertRecord>(&line) {
                    Ok(record) => {
                        let entry = seen.entry(key_of(&record)).or_insert(record.timestamp);
                        if record.timestamp > *entry {
                            *entry = record.timestamp;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping malformed alert line");
                    }
                }
            }
        } else if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self {
            path,
            window: Duration::milliseconds(dedup_window_ms),
            seen: Mutex::new(seen),
        })
    }
}

#[async_trait]
impl AlertStore for JsonlAlertStore {
    async fn try_persist(&self, record: &AlertRecord) -> Result<PersistOutcome> {
        {
            let seen = self.seen.lock().unwrap();
            if let Some(last) = seen.get(&key_of(record)) {
                if record.timestamp - *last < self.window {
                    return Ok(PersistOutcome::Duplicate);
                }
            }
        }

        let line = serde_json::to_string(record).map_err(crate::error::NotifyError::from)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(crate::error::NotifyError::from)?;
        writeln!(file, "{line}").map_err(crate::error::NotifyError::from)?;

        self.seen
            .lock()
            .unwrap()
            .insert(key_of(record), record.timestamp);
        Ok(PersistOutcome::Accepted)
    }
}
