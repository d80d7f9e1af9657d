use crate::{DocumentSink, WriteDestination};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use tagmon_common::types::CycleDocument;

/// In-memory sink used by tests. Failure injection covers both the
/// readiness probe and individual writes.
#[derive(Default)]
pub struct MemorySink {
    documents: Mutex<HashMap<String, Vec<CycleDocument>>>,
    available: AtomicBool,
    fail_writes: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            fail_writes: AtomicU32::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes the next `n` writes fail.
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    pub fn documents(&self, destination: &WriteDestination) -> Vec<CycleDocument> {
        self.documents
            .lock()
            .unwrap()
            .get(&destination.to_string())
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_documents(&self) -> usize {
        self.documents.lock().unwrap().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn ping(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            bail!("memory sink marked unavailable")
        }
    }

    async fn write(&self, document: &CycleDocument, destination: &WriteDestination) -> Result<()> {
        if self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("injected write failure");
        }
        if !self.available.load(Ordering::SeqCst) {
            bail!("memory sink marked unavailable");
        }
        self.documents
            .lock()
            .unwrap()
            .entry(destination.to_string())
            .or_default()
            .push(document.clone());
        Ok(())
    }
}
