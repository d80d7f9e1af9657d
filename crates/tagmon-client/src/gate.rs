use tokio::sync::watch;

/// One-shot readiness broadcast: the registry fires it once when the first
/// persistence backend becomes reachable, and every client waiting on its
/// gate proceeds. Once open it never closes again — later backend outages
/// are handled per write, not here.
pub struct ReadinessSignal {
    tx: watch::Sender<bool>,
}

/// Receiving side held by each client's connection supervisor.
#[derive(Clone)]
pub struct ReadinessGate {
    rx: watch::Receiver<bool>,
}

/// Creates the signal/gate pair, initially closed.
pub fn readiness() -> (ReadinessSignal, ReadinessGate) {
    let (tx, rx) = watch::channel(false);
    (ReadinessSignal { tx }, ReadinessGate { rx })
}

impl ReadinessSignal {
    /// Opens the gate. Idempotent.
    pub fn fire(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn gate(&self) -> ReadinessGate {
        ReadinessGate {
            rx: self.tx.subscribe(),
        }
    }
}

impl ReadinessGate {
    /// Resolves immediately when the gate is already open, otherwise waits
    /// for the broadcast. A dropped signal counts as open so clients are
    /// not wedged during shutdown.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn is_open(&self) -> bool {
        *self.rx.borrow()
    }

    /// An already-open gate, for tests and single-backend setups.
    pub fn open() -> Self {
        let (_, rx) = watch::channel(true);
        ReadinessGate { rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_blocks_until_fired_then_never_again() {
        let (signal, gate) = readiness();
        assert!(!gate.is_open());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.wait().await;
            })
        };
        // Give the waiter a chance to park on the gate.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        signal.fire();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("gate did not open")
            .unwrap();

        // Subsequent waits resolve immediately.
        tokio::time::timeout(Duration::from_millis(50), gate.wait())
            .await
            .expect("open gate blocked");
    }

    #[tokio::test]
    async fn fire_is_idempotent() {
        let (signal, gate) = readiness();
        signal.fire();
        signal.fire();
        assert!(gate.is_open());
    }
}
