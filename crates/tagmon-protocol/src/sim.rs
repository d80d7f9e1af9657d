//! In-process device simulator implementing [`ProtocolClient`].
//!
//! Tests and demo fleets poll this instead of a real device. Register
//! values, quality statuses, connect failures, and read latency are all
//! adjustable at runtime through a shared [`DeviceHandle`].

use crate::{BrowseItem, NodeAddress, NodeClass, NodeId, ProtocolClient, ReadValue, SessionEvent};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone)]
struct Register {
    value: f64,
    status: String,
}

#[derive(Default)]
struct DeviceState {
    registers: Vec<(NodeAddress, Register)>,
    paths: HashMap<String, NodeAddress>,
    connect_failures: u32,
    read_delay: Option<Duration>,
    events: Option<UnboundedSender<SessionEvent>>,
}

impl DeviceState {
    fn register_mut(&mut self, addr: &NodeAddress) -> Option<&mut Register> {
        self.registers
            .iter_mut()
            .find(|(a, _)| a == addr)
            .map(|(_, r)| r)
    }
}

/// Shared control handle over a [`SimulatedDevice`]'s address space.
#[derive(Clone)]
pub struct DeviceHandle {
    state: Arc<Mutex<DeviceState>>,
}

impl DeviceHandle {
    /// Sets a register value with `Good` quality, creating it if missing.
    pub fn set(&self, addr: NodeAddress, value: f64) {
        self.set_with_status(addr, value, "Good");
    }

    pub fn set_with_status(&self, addr: NodeAddress, value: f64, status: &str) {
        let mut state = self.state.lock().unwrap();
        let status = status.to_string();
        match state.register_mut(&addr) {
            Some(reg) => {
                reg.value = value;
                reg.status = status;
            }
            None => state.registers.push((addr, Register { value, status })),
        }
    }

    pub fn remove(&self, addr: &NodeAddress) {
        self.state.lock().unwrap().registers.retain(|(a, _)| a != addr);
    }

    /// Registers a browse path resolvable via `translate_path`.
    pub fn add_path(&self, path: &str, addr: NodeAddress) {
        self.state.lock().unwrap().paths.insert(path.to_string(), addr);
    }

    /// Makes the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().unwrap().connect_failures = n;
    }

    /// Adds an artificial per-read delay.
    pub fn set_read_delay(&self, delay: Duration) {
        self.state.lock().unwrap().read_delay = Some(delay);
    }

    /// Emits a session lifecycle event toward the connected supervisor.
    /// Returns false when no supervisor is listening.
    pub fn emit(&self, event: SessionEvent) -> bool {
        let state = self.state.lock().unwrap();
        match &state.events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

/// Simulated device exposing a flat namespace of numeric/symbolic registers.
pub struct SimulatedDevice {
    namespace: u16,
    state: Arc<Mutex<DeviceState>>,
    connected: bool,
    session: bool,
}

impl SimulatedDevice {
    pub fn new(namespace: u16) -> Self {
        Self {
            namespace,
            state: Arc::new(Mutex::new(DeviceState::default())),
            connected: false,
            session: false,
        }
    }

    pub fn with_register(self, id: u32, value: f64) -> Self {
        self.handle().set(NodeAddress::Numeric(id), value);
        self
    }

    pub fn handle(&self) -> DeviceHandle {
        DeviceHandle {
            state: self.state.clone(),
        }
    }
}

#[async_trait]
impl ProtocolClient for SimulatedDevice {
    async fn connect(
        &mut self,
        endpoint: &str,
        events: UnboundedSender<SessionEvent>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            bail!("simulated endpoint {endpoint} refused connection");
        }
        state.events = Some(events);
        drop(state);
        self.connected = true;
        Ok(())
    }

    async fn create_session(&mut self) -> Result<()> {
        if !self.connected {
            bail!("cannot create session: not connected");
        }
        self.session = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.session = false;
        self.connected = false;
        self.state.lock().unwrap().events = None;
        Ok(())
    }

    async fn read(&mut self, node: &NodeId) -> Result<ReadValue> {
        if !self.session {
            bail!("no active session");
        }
        let (reg, delay) = {
            let state = self.state.lock().unwrap();
            let reg = state
                .registers
                .iter()
                .find(|(a, _)| *a == node.address)
                .map(|(_, r)| r.clone());
            (reg, state.read_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match reg {
            Some(reg) => Ok(ReadValue {
                value: reg.value,
                status: reg.status,
            }),
            None => bail!("node {node} not found in simulated address space"),
        }
    }

    async fn browse(&mut self, _node: &NodeId) -> Result<Vec<BrowseItem>> {
        if !self.session {
            bail!("no active session");
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .registers
            .iter()
            .map(|(addr, _)| {
                let name = match addr {
                    NodeAddress::Numeric(n) => n.to_string(),
                    NodeAddress::Symbolic(s) => s.clone(),
                };
                BrowseItem {
                    node: NodeId {
                        namespace: self.namespace,
                        address: addr.clone(),
                    }
                    .to_string(),
                    browse_name: name.clone(),
                    display_name: name,
                    node_class: NodeClass::Variable,
                }
            })
            .collect())
    }

    async fn translate_path(&mut self, path: &str) -> Result<Option<NodeId>> {
        if !self.session {
            bail!("no active session");
        }
        let state = self.state.lock().unwrap();
        Ok(state.paths.get(path).map(|addr| NodeId {
            namespace: self.namespace,
            address: addr.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn connected(device: &mut SimulatedDevice) {
        let (tx, _rx) = mpsc::unbounded_channel();
        device.connect("sim://test", tx).await.unwrap();
        device.create_session().await.unwrap();
    }

    #[tokio::test]
    async fn read_returns_configured_value_and_status() {
        let mut device = SimulatedDevice::new(2).with_register(1057, 42.5);
        connected(&mut device).await;

        let rv = device.read(&NodeId::numeric(2, 1057)).await.unwrap();
        assert_eq!(rv.value, 42.5);
        assert_eq!(rv.status, "Good");

        device
            .handle()
            .set_with_status(NodeAddress::Numeric(1057), 0.0, "BadSensorFailure");
        let rv = device.read(&NodeId::numeric(2, 1057)).await.unwrap();
        assert_eq!(rv.status, "BadSensorFailure");
    }

    #[tokio::test]
    async fn unknown_node_is_a_read_error() {
        let mut device = SimulatedDevice::new(2);
        connected(&mut device).await;
        assert!(device.read(&NodeId::numeric(2, 9999)).await.is_err());
    }

    #[tokio::test]
    async fn forced_connect_failures_then_success() {
        let mut device = SimulatedDevice::new(2);
        device.handle().fail_next_connects(2);

        for _ in 0..2 {
            let (tx, _rx) = mpsc::unbounded_channel();
            assert!(device.connect("sim://test", tx).await.is_err());
        }
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(device.connect("sim://test", tx).await.is_ok());
    }

    #[tokio::test]
    async fn translate_path_resolves_registered_paths() {
        let mut device = SimulatedDevice::new(2).with_register(1057, 1.0);
        device.handle().add_path("Objects/Line1/Temp", NodeAddress::Numeric(1057));
        connected(&mut device).await;

        let node = device.translate_path("Objects/Line1/Temp").await.unwrap();
        assert_eq!(node, Some(NodeId::numeric(2, 1057)));
        assert_eq!(device.translate_path("Objects/Nope").await.unwrap(), None);
    }
}
