use crate::{DocumentSink, WriteDestination};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tagmon_common::types::CycleDocument;

/// Fixed-delay retry wrapper around a [`DocumentSink`].
///
/// The delay is deliberately constant, not exponential; at fleet-scale
/// connection volumes a flat cadence is sufficient and easier to reason
/// about. When every attempt fails the document is lost — cycles are not
/// buffered for replay.
pub struct RetryingSink {
    inner: Arc<dyn DocumentSink>,
    attempts: u32,
    delay: Duration,
}

impl RetryingSink {
    pub fn new(inner: Arc<dyn DocumentSink>, attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }
}

#[async_trait]
impl DocumentSink for RetryingSink {
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn write(&self, document: &CycleDocument, destination: &WriteDestination) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.write(document, destination).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        destination = %destination,
                        attempt,
                        error = %e,
                        "Cycle document write failed"
                    );
                    if attempt >= self.attempts {
                        return Err(e);
                    }
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
