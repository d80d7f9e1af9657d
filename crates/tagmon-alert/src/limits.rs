use crate::resolver;
use serde::{Deserialize, Serialize};
use tagmon_common::types::DeviationKind;

/// Per-tag limit configuration as stored in the JSON documents.
///
/// Field names follow the historical document format. A threshold of zero
/// (or an absent field, which deserializes to zero) disables that
/// deviation kind, so synthesized placeholder entries never alert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    #[serde(rename = "Min", default)]
    pub min: f64,
    #[serde(rename = "Max", default)]
    pub max: f64,
    #[serde(rename = "Unit", default)]
    pub unit: String,
    #[serde(rename = "SPAlarmLL", default)]
    pub low_low: f64,
    #[serde(rename = "SPAlarmL", default)]
    pub low: f64,
    #[serde(rename = "SPAlarmH", default)]
    pub high: f64,
    #[serde(rename = "SPAlarmHH", default)]
    pub high_high: f64,
}

impl LimitConfig {
    /// The active threshold for `kind`, or `None` when that kind is
    /// disabled (zero, absent, or non-finite).
    pub fn threshold(&self, kind: DeviationKind) -> Option<f64> {
        let raw = match kind {
            DeviationKind::LowLow => self.low_low,
            DeviationKind::Low => self.low,
            DeviationKind::High => self.high,
            DeviationKind::HighHigh => self.high_high,
        };
        (raw != 0.0 && raw.is_finite()).then_some(raw)
    }
}

/// One named entry of a limit table. Position within the table is the join
/// key to the client's raw tag list.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitEntry {
    pub name: String,
    pub config: LimitConfig,
}

/// Canonical in-memory representation of a client's limit document.
///
/// Documents come in two legacy shapes — an implicitly indexed array or an
/// object of named entries — both normalized here at the load boundary.
/// Entry order is preserved because it carries the index alignment with
/// the raw tag list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitTable {
    entries: Vec<LimitEntry>,
}

/// Raw document shapes accepted on disk.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LimitFile {
    Indexed(Vec<LimitConfig>),
    Named(serde_json::Map<String, serde_json::Value>),
}

impl LimitTable {
    pub fn new(entries: Vec<LimitEntry>) -> Self {
        Self { entries }
    }

    /// Normalizes a freshly parsed document. Array entries are named by
    /// their index; object entries keep their keys and order. A malformed
    /// object value degrades to an all-disabled config.
    pub fn from_file(file: LimitFile) -> Self {
        let entries = match file {
            LimitFile::Indexed(configs) => configs
                .into_iter()
                .enumerate()
                .map(|(idx, config)| LimitEntry {
                    name: resolver::canonical_name(idx),
                    config,
                })
                .collect(),
            LimitFile::Named(map) => map
                .into_iter()
                .map(|(name, value)| {
                    let config = serde_json::from_value(value).unwrap_or_else(|e| {
                        tracing::warn!(tag = %name, error = %e, "Malformed limit entry, disabling");
                        LimitConfig::default()
                    });
                    LimitEntry { name, config }
                })
                .collect(),
        };
        Self { entries }
    }

    /// Serializes back to the named-object document shape.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for entry in &self.entries {
            map.insert(
                entry.name.clone(),
                serde_json::to_value(&entry.config).unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(map)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LimitEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&LimitConfig> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.config)
    }

    pub fn entry_at(&self, index: usize) -> Option<&LimitEntry> {
        self.entries.get(index)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Extends the table with never-alerting placeholder entries until it
    /// holds at least `len` entries. Returns true when anything was added.
    pub fn grow_to(&mut self, len: usize) -> bool {
        let before = self.entries.len();
        while self.entries.len() < len {
            let name = resolver::canonical_name(self.entries.len());
            self.entries.push(LimitEntry {
                name,
                config: LimitConfig::default(),
            });
        }
        self.entries.len() > before
    }
}
