//! Persistence collaborator contract for cycle documents.
//!
//! The core never talks to a concrete database; it hands each successful
//! poll cycle's [`CycleDocument`] to a [`DocumentSink`] addressed by a
//! [`WriteDestination`]. The [`retry::RetryingSink`] wrapper adds the
//! fixed-delay reconnect-and-retry behavior; data that still cannot be
//! written is dropped, not buffered.

pub mod jsonl;
pub mod memory;
pub mod retry;


use anyhow::Result;
use async_trait::async_trait;
use tagmon_common::types::CycleDocument;

/// Database and collection a client's readings land in, derived from the
/// client's fleet index once the backend is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteDestination {
    pub database: String,
    pub collection: String,
}

impl WriteDestination {
    /// Destination for the client at `index` (0-based) in the fleet
    /// document, e.g. index 2 → `client_03_readings`.
    pub fn for_index(database: &str, index: usize) -> Self {
        Self {
            database: database.to_string(),
            collection: format!("client_{:02}_readings", index + 1),
        }
    }
}

impl std::fmt::Display for WriteDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.database, self.collection)
    }
}

/// Persistence backend for cycle documents.
///
/// Implementations must tolerate being called before the underlying
/// connection is warm; callers wrap them in [`retry::RetryingSink`] and
/// accept loss when all attempts fail.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Cheap reachability probe used by the registry's readiness loop.
    async fn ping(&self) -> Result<()>;

    /// Writes one cycle document to `destination`.
    async fn write(&self, document: &CycleDocument, destination: &WriteDestination) -> Result<()>;
}
