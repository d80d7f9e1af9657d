//! Periodic read-cycle trigger, one timer task per client.
//!
//! Ticks spawn cycles fire-and-forget, but a single-flight guard skips the
//! tick when the previous cycle has not finished; skips are counted and
//! surfaced in the status snapshot. Changing the tag set or interval goes
//! through `start()` (restart semantics), never incremental update.

use crate::{cycle, ClientInner};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

pub(crate) struct PollingScheduler {
    handle: Mutex<Option<JoinHandle<()>>>,
    active_tags: AtomicUsize,
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(None),
            active_tags: AtomicUsize::new(0),
        }
    }

    pub fn active_tags(&self) -> usize {
        self.active_tags.load(Ordering::SeqCst)
    }

    /// Cancels the timer. Idempotent; an in-flight cycle is left to finish
    /// and discard its own results.
    pub fn stop(&self) {
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
        self.active_tags.store(0, Ordering::SeqCst);
    }
}

pub(crate) fn start(inner: Arc<ClientInner>, tag_count: usize, interval_ms: u64) {
    inner.scheduler.stop();
    inner.scheduler.active_tags.store(tag_count, Ordering::SeqCst);

    tracing::info!(
        client_id = %inner.config.id,
        tags = tag_count,
        interval_ms,
        "Polling scheduler armed"
    );

    let task_inner = inner.clone();
    let handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            tick.tick().await;
            if task_inner
                .in_flight
                .swap(true, std::sync::atomic::Ordering::SeqCst)
            {
                task_inner.lock_state().skipped_ticks += 1;
                tracing::debug!(
                    client_id = %task_inner.config.id,
                    "Previous cycle still running, tick skipped"
                );
                continue;
            }
            let cycle_inner = task_inner.clone();
            tokio::spawn(async move {
                cycle::run(&cycle_inner).await;
                cycle_inner
                    .in_flight
                    .store(false, std::sync::atomic::Ordering::SeqCst);
            });
        }
    });

    *inner
        .scheduler
        .handle
        .lock()
        .unwrap_or_else(|p| p.into_inner()) = Some(handle);
}
