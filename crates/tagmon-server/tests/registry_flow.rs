mod common;

use common::fixture;
use std::collections::BTreeMap;
use std::time::Duration;
use tagmon_alert::limits::{LimitFile, LimitTable};
use tagmon_alert::LimitStore;
use tagmon_protocol::NodeAddress;
use tagmon_server::config::{DeviceEntry, FleetFile};
use tagmon_storage::WriteDestination;

fn fleet(entries: &[(&str, &[&str])]) -> FleetFile {
    let mut fleet = BTreeMap::new();
    for (id, tags) in entries {
        fleet.insert(
            id.to_string(),
            DeviceEntry {
                endpoint: format!("sim://{id}"),
                namespace: 2,
                tags: tags.iter().map(|s| s.to_string()).collect(),
            },
        );
    }
    fleet
}

fn limits(json: &str) -> LimitTable {
    LimitTable::from_file(serde_json::from_str::<LimitFile>(json).unwrap())
}

#[tokio::test]
async fn fleet_waits_for_readiness_then_polls_and_alerts() {
    let (fx, factory) = fixture(&["plc-01", "plc-02"]);
    fx.devices["plc-01"].set(NodeAddress::Numeric(1057), 95.0);
    fx.devices["plc-01"].set(NodeAddress::Numeric(1058), 5.0);
    fx.devices["plc-02"].set(NodeAddress::Numeric(2001), 1.0);
    fx.limit_store
        .save(
            "plc-01",
            &limits(r#"{"Boiler_Temp": {"SPAlarmH": 90, "Unit": "C"}}"#),
        )
        .unwrap();

    let fleet = fleet(&[("plc-01", &["1057", "1058"]), ("plc-02", &["2001"])]);
    fx.registry.load_fleet(&fleet, &factory).await;

    // Gate unsatisfied: connects must park, nothing polls.
    fx.registry.connect_all().await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(fx
        .registry
        .status_all()
        .await
        .iter()
        .all(|s| !s.connected));
    assert_eq!(fx.sink.total_documents(), 0);

    // Backend comes up: gate fires once, clients connect and poll.
    fx.registry.mark_storage_ready().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let statuses = fx.registry.status_all().await;
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().all(|s| s.connected));
    assert!(statuses.iter().all(|s| s.reads_total > 0));

    // Destinations derive from the (deterministic) fleet index.
    let dest1 = WriteDestination::for_index("tagmon", 0);
    let dest2 = WriteDestination::for_index("tagmon", 1);
    assert!(!fx.sink.documents(&dest1).is_empty());
    assert!(!fx.sink.documents(&dest2).is_empty());
    assert_eq!(
        fx.sink.documents(&dest1)[0].values.get("ns=2;i=1057"),
        Some(&95.0)
    );

    // The breach on plc-01 fired exactly once through both dedup layers.
    assert_eq!(fx.store.records().len(), 1);
    assert_eq!(fx.sent.lock().unwrap().len(), 1);
    let stats = fx.registry.alert_stats("plc-01").await.unwrap();
    assert_eq!(stats[0].tag, "Boiler_Temp");
    assert!(stats[0].occurrences >= 1);

    // The short limit table grew to cover both tags and was saved back.
    let saved = fx.limit_store.tables.lock().unwrap()["plc-01"].clone();
    assert_eq!(saved.len(), 2);

    // Telemetry fans out per client.
    let telemetry = fx
        .registry
        .telemetry("plc-01", chrono::Utc::now())
        .await
        .unwrap();
    assert!(telemetry.summary.reads_per_sec > 0.0);

    // Removal disconnects and forgets the client.
    assert!(fx.registry.remove("plc-02").await);
    assert!(fx.registry.status("plc-02").await.is_none());
    assert_eq!(fx.registry.status_all().await.len(), 1);

    assert!(fx.registry.remove("plc-01").await);
}

#[tokio::test]
async fn unknown_client_queries_return_none_not_errors() {
    let (fx, _factory) = fixture(&[]);
    assert!(fx.registry.status("ghost").await.is_none());
    assert!(fx.registry.telemetry("ghost", chrono::Utc::now()).await.is_none());
    assert!(fx.registry.alert_stats("ghost").await.is_none());
    assert!(!fx.registry.remove("ghost").await);
    assert!(!fx.registry.connect_one("ghost").await);
    assert!(!fx.registry.disconnect_one("ghost").await);
}

#[tokio::test]
async fn overview_aggregates_across_the_fleet() {
    let (fx, factory) = fixture(&["plc-01"]);
    fx.devices["plc-01"].set(NodeAddress::Numeric(1057), 1.0);

    let fleet = fleet(&[("plc-01", &["1057"])]);
    fx.registry.load_fleet(&fleet, &factory).await;
    fx.registry.mark_storage_ready().await;
    fx.registry.connect_all().await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    let overview = fx.registry.overview().await;
    assert_eq!(overview.clients_total, 1);
    assert_eq!(overview.clients_connected, 1);
    assert!(overview.reads_total > 0);
    assert_eq!(overview.notification_channels, 1);

    assert!(fx.registry.remove("plc-01").await);
}
