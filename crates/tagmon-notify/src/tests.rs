use crate::manager::NotificationManager;
use crate::store::{JsonlAlertStore, MemoryAlertStore};
use crate::{AlertStore, NotificationChannel, PersistOutcome};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tagmon_common::types::{AlertRecord, DeviationKind, Severity};

fn record(tag: &str, kind: DeviationKind, at: DateTime<Utc>) -> AlertRecord {
    AlertRecord {
        id: tagmon_common::id::next_id(),
        client_id: "plc-01".to_string(),
        tag: tag.to_string(),
        kind,
        value: 99.0,
        occurrences: 1,
        unit: "C".to_string(),
        message: format!("{tag} {}", kind.describe()),
        timestamp: at,
    }
}

struct RecordingChannel {
    name: &'static str,
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
        self.name
    }
}

#[tokio::test]
async fn memory_store_deduplicates_within_window() {
    let store = MemoryAlertStore::new(300_000);
    let t0 = Utc::now();

    let first = store
        .try_persist(&record("Tag_01", DeviationKind::High, t0))
        .await
        .unwrap();
    assert_eq!(first, PersistOutcome::Accepted);

    let inside = store
        .try_persist(&record(
            "Tag_01",
            DeviationKind::High,
            t0 + Duration::milliseconds(100_000),
        ))
        .await
        .unwrap();
    assert_eq!(inside, PersistOutcome::Duplicate);

    let outside = store
        .try_persist(&record(
            "Tag_01",
            DeviationKind::High,
            t0 + Duration::milliseconds(400_000),
        ))
        .await
        .unwrap();
    assert_eq!(outside, PersistOutcome::Accepted);
    assert_eq!(store.records().len(), 2);
}

#[tokio::test]
async fn memory_store_tracks_kinds_independently() {
    let store = MemoryAlertStore::new(300_000);
    let t0 = Utc::now();

    assert_eq!(
        store
            .try_persist(&record("Tag_01", DeviationKind::High, t0))
            .await
            .unwrap(),
        PersistOutcome::Accepted
    );
    assert_eq!(
        store
            .try_persist(&record("Tag_01", DeviationKind::HighHigh, t0))
            .await
            .unwrap(),
        PersistOutcome::Accepted
    );
}

#[tokio::test]
async fn jsonl_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alerts.jsonl");
    let t0 = Utc::now();

    {
        let store = JsonlAlertStore::open(&path, 300_000).unwrap();
        assert_eq!(
            store
                .try_persist(&record("Tag_01", DeviationKind::High, t0))
                .await
                .unwrap(),
            PersistOutcome::Accepted
        );
    }

    // A fresh process replays the file and still suppresses the pair.
    let reopened = JsonlAlertStore::open(&path, 300_000).unwrap();
    assert_eq!(
        reopened
            .try_persist(&record(
                "Tag_01",
                DeviationKind::High,
                t0 + Duration::milliseconds(60_000),
            ))
            .await
            .unwrap(),
        PersistOutcome::Duplicate
    );
    assert_eq!(
        reopened
            .try_persist(&record(
                "Tag_01",
                DeviationKind::High,
                t0 + Duration::milliseconds(400_000),
            ))
            .await
            .unwrap(),
        PersistOutcome::Accepted
    );
}

#[tokio::test]
async fn manager_routes_by_minimum_severity() {
    let store = Arc::new(MemoryAlertStore::new(0));
    let critical_sent = Arc::new(Mutex::new(Vec::new()));
    let warning_sent = Arc::new(Mutex::new(Vec::new()));

    let mut manager = NotificationManager::new(store);
    manager.add_channel(
        Box::new(RecordingChannel {
            name: "pager",
            sent: critical_sent.clone(),
        }),
        Severity::Critical,
    );
    manager.add_channel(
        Box::new(RecordingChannel {
            name: "chat",
            sent: warning_sent.clone(),
        }),
        Severity::Warning,
    );

    // High is a warning: chat only.
    manager
        .dispatch(&record("Tag_01", DeviationKind::High, Utc::now()))
        .await;
    assert_eq!(critical_sent.lock().unwrap().len(), 0);
    assert_eq!(warning_sent.lock().unwrap().len(), 1);

    // HighHigh is critical: both.
    manager
        .dispatch(&record("Tag_01", DeviationKind::HighHigh, Utc::now()))
        .await;
    assert_eq!(critical_sent.lock().unwrap().len(), 1);
    assert_eq!(warning_sent.lock().unwrap().len(), 2);

    let (subject, body) = warning_sent.lock().unwrap()[0].clone();
    assert!(subject.contains("plc-01"));
    assert!(body.contains("above high limit"));
}
