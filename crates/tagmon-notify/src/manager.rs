use crate::{AlertStore, NotificationChannel, PersistOutcome};
use anyhow::Result;
use std::sync::Arc;
use tagmon_common::types::{AlertRecord, Severity};

struct Route {
    channel: Box<dyn NotificationChannel>,
    min_severity: Severity,
}

/// Routes accepted alert records to the registered channels.
///
/// The manager does not decide *whether* an alert fires — it owns the
/// persisted-record step and the outbound fan-out. A channel only receives
/// records at or above its configured minimum severity; delivery failures
/// are absorbed and logged.
pub struct NotificationManager {
    store: Arc<dyn AlertStore>,
    routes: Vec<Route>,
}

impl NotificationManager {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self {
            store,
            routes: Vec::new(),
        }
    }

    pub fn add_channel(
        &mut self,
        channel: Box<dyn NotificationChannel>,
        min_severity: Severity,
    ) -> &mut Self {
        self.routes.push(Route {
            channel,
            min_severity,
        });
        self
    }

    pub fn channel_count(&self) -> usize {
        self.routes.len()
    }

    /// Offers the record to the persisted store. `Duplicate` means another
    /// process (or a previous life of this one) already reported the pair
    /// within the window.
    pub async fn try_persist(&self, record: &AlertRecord) -> Result<PersistOutcome> {
        self.store.try_persist(record).await
    }

    /// Fans the record out to every channel whose severity floor it meets.
    pub async fn dispatch(&self, record: &AlertRecord) {
        let severity = record.kind.severity();
        let subject = record.subject();

        for route in &self.routes {
            if severity < route.min_severity {
                continue;
            }
            if let Err(e) = route.channel.send(&subject, &record.message).await {
                tracing::error!(
                    channel = route.channel.channel_name(),
                    client_id = %record.client_id,
                    tag = %record.tag,
                    error = %e,
                    "Failed to send notification"
                );
            } else {
                tracing::info!(
                    channel = route.channel.channel_name(),
                    client_id = %record.client_id,
                    tag = %record.tag,
                    kind = %record.kind,
                    "Notification sent"
                );
            }
        }
    }
}
