//! Connection lifecycle: `Disconnected → Connecting → Connected`, with any
//! failure falling back to `Disconnected`. Failures are absorbed into the
//! status snapshot so the registry loop stays alive.

use crate::{scheduler, ClientInner, RECONNECT_WINDOW_MS};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tagmon_common::types::ConnectionState;
use tagmon_protocol::SessionEvent;
use tokio::sync::mpsc;

pub(crate) async fn connect(inner: Arc<ClientInner>) {
    {
        let mut state = inner.lock_state();
        match state.connection {
            ConnectionState::Connecting | ConnectionState::Connected => {
                tracing::debug!(
                    client_id = %inner.config.id,
                    state = %state.connection,
                    "connect() ignored"
                );
                return;
            }
            ConnectionState::Disconnected => state.connection = ConnectionState::Connecting,
        }
    }

    // No point paying for a protocol handshake while nothing can sink the
    // data; the gate opens once and stays open.
    inner.deps.gate.wait().await;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let result = {
        let mut protocol = inner.protocol.lock().await;
        match protocol.connect(&inner.config.endpoint, events_tx).await {
            Ok(()) => protocol.create_session().await,
            Err(e) => Err(e),
        }
    };

    match result {
        Ok(()) => {
            let now = Utc::now();
            {
                let mut state = inner.lock_state();
                state.connection = ConnectionState::Connected;
                state.session_started_at = Some(now);
                state.last_session_at = Some(now);
                state.reads_total = 0;
                state.skipped_ticks = 0;
                state.failures.clear();
                state.last_error = None;
            }
            let listener = tokio::spawn(event_loop(inner.clone(), events_rx));
            *inner
                .events_task
                .lock()
                .unwrap_or_else(|p| p.into_inner()) = Some(listener);

            tracing::info!(
                client_id = %inner.config.id,
                endpoint = %inner.config.endpoint,
                tags = inner.config.tags.len(),
                "Session established"
            );

            if !inner.config.tags.is_empty() {
                scheduler::start(
                    inner.clone(),
                    inner.config.tags.len(),
                    inner.config.poll_interval_ms,
                );
            }
        }
        Err(e) => {
            {
                let mut state = inner.lock_state();
                state.connection = ConnectionState::Disconnected;
                state.last_error = Some(e.to_string());
            }
            tracing::warn!(
                client_id = %inner.config.id,
                endpoint = %inner.config.endpoint,
                error = %e,
                "Connect failed"
            );
        }
    }
}

pub(crate) async fn disconnect(inner: &Arc<ClientInner>) {
    // Timer first, in every state: no read cycle may start against a
    // session that is mid-teardown.
    inner.scheduler.stop();
    if let Some(task) = inner
        .events_task
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .take()
    {
        task.abort();
    }

    let was_connected = inner.is_connected();
    if was_connected {
        let mut protocol = inner.protocol.lock().await;
        if let Err(e) = protocol.disconnect().await {
            tracing::warn!(client_id = %inner.config.id, error = %e, "Session close failed");
        }
    }

    let now = Utc::now();
    let mut state = inner.lock_state();
    if let Some(started) = state.session_started_at.take() {
        state.session_secs = Some((now - started).num_seconds());
    }
    state.connection = ConnectionState::Disconnected;
    drop(state);

    if was_connected {
        tracing::info!(client_id = %inner.config.id, "Disconnected");
    }
}

/// Records protocol stability events for telemetry. These never drive the
/// state machine; the underlying library owns the retry mechanics.
async fn event_loop(inner: Arc<ClientInner>, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        let now = Utc::now();
        tracing::debug!(client_id = %inner.config.id, ?event, "Session event");
        let mut events = inner.events.lock().unwrap_or_else(|p| p.into_inner());
        events.push_back((now, event));
        let cutoff = now - Duration::milliseconds(RECONNECT_WINDOW_MS);
        while let Some((at, _)) = events.front() {
            if *at < cutoff {
                events.pop_front();
            } else {
                break;
            }
        }
    }
}
