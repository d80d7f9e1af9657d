//! One poll cycle: read every configured tag, fold the outcomes into the
//! metrics window, evaluate alerts, persist the value document.
//!
//! A cycle may outlive a disconnect; it re-checks connection state before
//! every side-effect stage and discards its results once the client is no
//! longer connected.

use crate::ClientInner;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tagmon_common::types::{CycleDocument, QualityClass};
use tagmon_notify::PersistOutcome;
use tagmon_protocol::NodeId;

pub(crate) async fn run(inner: &Arc<ClientInner>) {
    if !inner.is_connected() {
        return;
    }

    let mut values: BTreeMap<String, f64> = BTreeMap::new();

    for raw in &inner.config.tags {
        if !inner.is_connected() {
            return;
        }
        let Some(node) = resolve_node(inner, raw).await else {
            record_failure(inner, raw, "unresolvable identifier");
            continue;
        };

        let started = Instant::now();
        let result = {
            let mut protocol = inner.protocol.lock().await;
            protocol.read(&node).await
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(read) => {
                let now = Utc::now();
                let quality = QualityClass::classify(&read.status);
                inner
                    .metrics
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .record_success(now, latency_ms, quality);
                {
                    let mut state = inner.lock_state();
                    state.reads_total += 1;
                    state.last_read_at = Some(now);
                    state.last_latency_ms = Some(latency_ms);
                }
                values.insert(node.to_string(), read.value);
            }
            Err(e) => {
                record_failure(inner, raw, &e.to_string());
            }
        }
    }

    if !inner.is_connected() {
        return;
    }

    evaluate_alerts(inner, &values).await;

    if values.is_empty() || !inner.is_connected() {
        return;
    }

    let destination = inner
        .destination
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .clone();
    let Some(destination) = destination else {
        tracing::debug!(
            client_id = %inner.config.id,
            "No persistence destination assigned yet, dropping cycle document"
        );
        return;
    };

    let document = CycleDocument {
        id: tagmon_common::id::next_id(),
        client_id: inner.config.id.clone(),
        timestamp: Utc::now(),
        values,
    };

    match inner.deps.sink.write(&document, &destination).await {
        Ok(()) => {
            inner
                .metrics
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .record_write(Utc::now());
        }
        Err(e) => {
            // Accepted loss: cycles are never buffered for replay.
            tracing::warn!(
                client_id = %inner.config.id,
                destination = %destination,
                error = %e,
                "Dropping cycle document, persistence unavailable"
            );
        }
    }
}

/// Two-layer alert commit: the engine's timestamp gate yields candidates,
/// the persisted-record check decides whether anything is actually sent.
async fn evaluate_alerts(inner: &Arc<ClientInner>, values: &BTreeMap<String, f64>) {
    let (candidates, grown_table) = {
        let mut engine = inner.engine.lock().unwrap_or_else(|p| p.into_inner());
        let grew = engine.ensure_capacity(inner.config.tags.len());
        let candidates = engine.ingest(values, &inner.config.tags, Utc::now());
        (candidates, grew.then(|| engine.limits().clone()))
    };

    if let Some(table) = grown_table {
        match inner.deps.limit_store.save(&inner.config.id, &table) {
            Ok(()) => tracing::info!(
                client_id = %inner.config.id,
                entries = table.len(),
                "Grown limit table persisted"
            ),
            Err(e) => tracing::warn!(
                client_id = %inner.config.id,
                error = %e,
                "Failed to persist grown limit table"
            ),
        }
    }

    for record in candidates {
        if !inner.is_connected() {
            return;
        }
        match inner.deps.notifier.try_persist(&record).await {
            Ok(PersistOutcome::Accepted) => {
                inner.deps.notifier.dispatch(&record).await;
                inner
                    .engine
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .mark_sent(&record.tag, record.kind, record.timestamp);
            }
            Ok(PersistOutcome::Duplicate) => {
                tracing::debug!(
                    client_id = %inner.config.id,
                    tag = %record.tag,
                    kind = %record.kind,
                    "Alert suppressed by persisted record"
                );
            }
            Err(e) => {
                tracing::warn!(
                    client_id = %inner.config.id,
                    tag = %record.tag,
                    error = %e,
                    "Alert store unavailable, alert not sent"
                );
            }
        }
    }
}

/// Composes the node identifier for a raw tag. Browse paths (containing
/// `/`) are translated once per session and cached.
async fn resolve_node(inner: &Arc<ClientInner>, raw: &str) -> Option<NodeId> {
    if !raw.contains('/') {
        return Some(NodeId::from_raw(raw, inner.config.namespace));
    }

    if let Some(node) = inner
        .resolved_paths
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .get(raw)
    {
        return Some(node.clone());
    }

    let translated = {
        let mut protocol = inner.protocol.lock().await;
        protocol.translate_path(raw).await
    };
    match translated {
        Ok(Some(node)) => {
            inner
                .resolved_paths
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .insert(raw.to_string(), node.clone());
            Some(node)
        }
        Ok(None) => {
            tracing::debug!(client_id = %inner.config.id, path = %raw, "Browse path not found");
            None
        }
        Err(e) => {
            tracing::debug!(client_id = %inner.config.id, path = %raw, error = %e, "Path translation failed");
            None
        }
    }
}

fn record_failure(inner: &Arc<ClientInner>, raw: &str, error: &str) {
    let now = Utc::now();
    inner
        .metrics
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .record_failure(now);
    let mut state = inner.lock_state();
    *state.failures.entry(raw.to_string()).or_insert(0) += 1;
    state.last_error = Some(error.to_string());
    tracing::debug!(
        client_id = %inner.config.id,
        tag = %raw,
        error = %error,
        "Tag read failed"
    );
}
