//! Wire-protocol contract for device clients.
//!
//! The actual protocol stack (session negotiation, secure channel, encoding)
//! is an external concern; this crate defines the narrow [`ProtocolClient`]
//! surface the polling core drives, the node address model, and an
//! in-process [`sim::SimulatedDevice`] used by tests and demo fleets.

pub mod node;
pub mod sim;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

pub use node::{NodeAddress, NodeId};

/// A single read result: the sampled value plus the protocol-level status
/// name it was delivered with (e.g. `"Good"`, `"BadNodeIdUnknown"`).
#[derive(Debug, Clone)]
pub struct ReadValue {
    pub value: f64,
    pub status: String,
}

/// Node class of a browse result entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeClass {
    Object,
    Variable,
    Method,
}

/// One entry returned by a browse of a device's address space.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct BrowseItem {
    pub node: String,
    pub browse_name: String,
    pub display_name: String,
    pub node_class: NodeClass,
}

/// Session lifecycle events raised by the protocol layer. The underlying
/// library manages actual retry mechanics; these are recorded for stability
/// reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The transport entered its reconnect backoff.
    Backoff,
    /// The transport re-established the connection.
    Reconnected,
}

/// The protocol collaborator driven by a client's connection supervisor.
///
/// Implementations own the transport and session handles; the supervisor
/// serializes access behind an async mutex, so `&mut self` methods never
/// race. Lifecycle events are delivered through the sender passed to
/// [`ProtocolClient::connect`].
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Establishes the transport connection to `endpoint`.
    async fn connect(&mut self, endpoint: &str, events: UnboundedSender<SessionEvent>)
        -> Result<()>;

    /// Creates a session on an established connection.
    async fn create_session(&mut self) -> Result<()>;

    /// Closes the session (if any) and the underlying connection.
    async fn disconnect(&mut self) -> Result<()>;

    /// Reads the current value of `node`.
    ///
    /// # Errors
    ///
    /// Returns an error when the node cannot be read at all; a readable
    /// node with degraded quality is reported through [`ReadValue::status`]
    /// instead.
    async fn read(&mut self, node: &NodeId) -> Result<ReadValue>;

    /// Lists the children of `node` in the device address space.
    async fn browse(&mut self, node: &NodeId) -> Result<Vec<BrowseItem>>;

    /// Resolves a browse path (e.g. `"Objects/Line1/Temperature"`) to a
    /// node identifier, or `None` when the path does not exist.
    async fn translate_path(&mut self, path: &str) -> Result<Option<NodeId>>;
}
