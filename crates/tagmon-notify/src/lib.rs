//! Notification delivery for threshold alerts.
//!
//! An alert is first offered to the [`AlertStore`] — the persisted half of
//! the two-layer deduplication, which survives process restarts. Only a
//! genuinely new record is then fanned out to the registered
//! [`NotificationChannel`]s by the [`manager::NotificationManager`].

pub mod channels;
pub mod error;
pub mod manager;
pub mod store;

#[cfg(test)]
mod tests;

use anyhow::Result;
use async_trait::async_trait;
use tagmon_common::types::AlertRecord;

/// Outcome of offering an alert record to the persisted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The record is new and was persisted; the caller should send.
    Accepted,
    /// The store already holds a recent record for this (client, tag,
    /// kind); nothing should be sent.
    Duplicate,
}

/// Persisted alert-record store with its own internal deduplication.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn try_persist(&self, record: &AlertRecord) -> Result<PersistOutcome>;
}

/// A delivery channel for alert notifications (webhook, mail gateway, …).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers one notification.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails after retries (if applicable).
    async fn send(&self, subject: &str, body: &str) -> Result<()>;

    /// Returns the channel type name (e.g., `"webhook"`).
    fn channel_name(&self) -> &str;
}
