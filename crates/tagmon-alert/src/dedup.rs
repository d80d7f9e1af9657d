use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tagmon_common::types::DeviationKind;

/// Key: (client id, canonical tag, deviation kind). Uniqueness per client
/// keeps fleets from suppressing each other's alerts.
type DedupKey = (String, String, DeviationKind);

/// Registry-owned store of last-sent timestamps, shared across all client
/// engines. Kinds on the same tag are tracked independently.
#[derive(Clone, Default)]
pub struct DedupStore {
    inner: Arc<Mutex<HashMap<DedupKey, DateTime<Utc>>>>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sent(
        &self,
        client_id: &str,
        tag: &str,
        kind: DeviationKind,
    ) -> Option<DateTime<Utc>> {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.get(&(client_id.to_string(), tag.to_string(), kind))
            .copied()
    }

    /// True when no prior send exists for the pair, or the window has
    /// fully elapsed since the last one.
    pub fn allows(
        &self,
        client_id: &str,
        tag: &str,
        kind: DeviationKind,
        now: DateTime<Utc>,
        window: Duration,
    ) -> bool {
        match self.last_sent(client_id, tag, kind) {
            Some(last) => now - last >= window,
            None => true,
        }
    }

    /// Records a completed send. Only called after the persisted-record
    /// check accepted the alert.
    pub fn mark(&self, client_id: &str, tag: &str, kind: DeviationKind, now: DateTime<Utc>) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.insert((client_id.to_string(), tag.to_string(), kind), now);
    }

    /// All last-sent timestamps for one (client, tag), keyed by kind name.
    pub fn sent_for_tag(&self, client_id: &str, tag: &str) -> HashMap<String, DateTime<Utc>> {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.iter()
            .filter(|((c, t, _), _)| c == client_id && t == tag)
            .map(|((_, _, kind), ts)| (kind.to_string(), *ts))
            .collect()
    }
}
