use crate::{DocumentSink, WriteDestination};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use tagmon_common::types::CycleDocument;

/// File-backed sink appending one JSON line per cycle document under
/// `<base>/<database>/<collection>.jsonl`. The default backend for
/// deployments without an external document store.
pub struct JsonlSink {
    base: PathBuf,
}

impl JsonlSink {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path_for(&self, destination: &WriteDestination) -> PathBuf {
        self.base
            .join(&destination.database)
            .join(format!("{}.jsonl", destination.collection))
    }
}

#[async_trait]
impl DocumentSink for JsonlSink {
    async fn ping(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base)
            .with_context(|| format!("data dir {} not writable", self.base.display()))
    }

    async fn write(&self, document: &CycleDocument, destination: &WriteDestination) -> Result<()> {
        let path = self.path_for(destination);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let line = serde_json::to_string(document)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}
