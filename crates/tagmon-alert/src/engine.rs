use crate::dedup::DedupStore;
use crate::limits::{LimitConfig, LimitTable};
use crate::resolver;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use tagmon_common::types::{AlertRecord, AlertStatSnapshot, DeviationKind};

/// Alert evaluation policy. One source of truth for the dedup interval —
/// both the engine gate and the persisted-record layer derive from it.
#[derive(Debug, Clone, Copy)]
pub struct AlertPolicy {
    pub dedup_window_ms: i64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            dedup_window_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TagStat {
    occurrences: u64,
    last_value: f64,
    last_kind: Option<DeviationKind>,
}

/// Per-client threshold evaluation with occurrence tracking and the
/// in-memory half of the two-layer notification dedup.
///
/// `ingest` emits candidate records that passed the timestamp gate; the
/// caller commits them through the notification store and reports back via
/// [`AlertEngine::mark_sent`] only for genuinely new records, so a
/// suppressed duplicate leaves the timestamp untouched.
pub struct AlertEngine {
    client_id: String,
    limits: LimitTable,
    stats: HashMap<String, TagStat>,
    dedup: DedupStore,
    policy: AlertPolicy,
}

impl AlertEngine {
    pub fn new(
        client_id: impl Into<String>,
        limits: LimitTable,
        dedup: DedupStore,
        policy: AlertPolicy,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            limits,
            stats: HashMap::new(),
            dedup,
            policy,
        }
    }

    /// Checks a value against the configured thresholds in strict priority
    /// order: high-high, high, low-low, low. The first match wins, so only
    /// the most severe satisfied kind is reported.
    pub fn evaluate(value: f64, config: &LimitConfig) -> Option<DeviationKind> {
        const PRIORITY: [DeviationKind; 4] = [
            DeviationKind::HighHigh,
            DeviationKind::High,
            DeviationKind::LowLow,
            DeviationKind::Low,
        ];
        for kind in PRIORITY {
            let Some(threshold) = config.threshold(kind) else {
                continue;
            };
            let breached = match kind {
                DeviationKind::HighHigh | DeviationKind::High => value >= threshold,
                DeviationKind::LowLow | DeviationKind::Low => value <= threshold,
            };
            if breached {
                return Some(kind);
            }
        }
        None
    }

    pub fn limits(&self) -> &LimitTable {
        &self.limits
    }

    /// Restores the index alignment invariant: grows the limit table with
    /// never-alerting placeholders up to `tag_count`. Returns true when
    /// the table changed and should be persisted back.
    pub fn ensure_capacity(&mut self, tag_count: usize) -> bool {
        self.limits.grow_to(tag_count)
    }

    /// Evaluates one cycle's values (keyed by raw identifier) and returns
    /// the candidates that cleared the in-memory dedup gate. Unresolvable
    /// keys are skipped with a diagnostic.
    pub fn ingest(
        &mut self,
        values: &BTreeMap<String, f64>,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> Vec<AlertRecord> {
        if self.ensure_capacity(tags.len()) {
            tracing::info!(
                client_id = %self.client_id,
                entries = self.limits.len(),
                "Limit table grown to match tag list"
            );
        }

        let window = Duration::milliseconds(self.policy.dedup_window_ms);
        let mut candidates = Vec::new();

        for (key, value) in values {
            let Some(tag) = resolver::resolve_name(key, tags, &self.limits) else {
                tracing::debug!(
                    client_id = %self.client_id,
                    key = %key,
                    "Value key does not resolve to a configured tag, skipping"
                );
                continue;
            };
            let Some(config) = self.limits.get(&tag).cloned() else {
                continue;
            };
            let Some(kind) = Self::evaluate(*value, &config) else {
                continue;
            };

            let stat = self.stats.entry(tag.clone()).or_default();
            stat.occurrences += 1;
            stat.last_value = *value;
            stat.last_kind = Some(kind);
            let occurrences = stat.occurrences;

            if !self.dedup.allows(&self.client_id, &tag, kind, now, window) {
                tracing::debug!(
                    client_id = %self.client_id,
                    tag = %tag,
                    kind = %kind,
                    "Alert suppressed (dedup window)"
                );
                continue;
            }

            candidates.push(self.build_record(&tag, kind, *value, occurrences, &config, now));
        }

        candidates
    }

    /// Records a completed send for the pair. Called only after the
    /// notification store accepted the record as new.
    pub fn mark_sent(&mut self, tag: &str, kind: DeviationKind, now: DateTime<Utc>) {
        self.dedup.mark(&self.client_id, tag, kind, now);
    }

    /// Per-tag statistics merged with the shared last-sent timestamps.
    pub fn stats_snapshot(&self) -> Vec<AlertStatSnapshot> {
        let mut snapshots: Vec<AlertStatSnapshot> = self
            .stats
            .iter()
            .map(|(tag, stat)| AlertStatSnapshot {
                tag: tag.clone(),
                occurrences: stat.occurrences,
                last_value: stat.last_value,
                last_kind: stat.last_kind,
                last_sent: self.dedup.sent_for_tag(&self.client_id, tag),
            })
            .collect();
        snapshots.sort_by(|a, b| a.tag.cmp(&b.tag));
        snapshots
    }

    fn build_record(
        &self,
        tag: &str,
        kind: DeviationKind,
        value: f64,
        occurrences: u64,
        config: &LimitConfig,
        now: DateTime<Utc>,
    ) -> AlertRecord {
        let threshold = config.threshold(kind).unwrap_or_default();
        let unit_suffix = if config.unit.is_empty() {
            String::new()
        } else {
            format!(" {}", config.unit)
        };
        AlertRecord {
            id: tagmon_common::id::next_id(),
            client_id: self.client_id.clone(),
            tag: tag.to_string(),
            kind,
            value,
            occurrences,
            unit: config.unit.clone(),
            message: format!(
                "{} on {} is {}: {:.2}{} (limit {:.2}), occurrence #{}",
                tag,
                self.client_id,
                kind.describe(),
                value,
                unit_suffix,
                threshold,
                occurrences,
            ),
            timestamp: now,
        }
    }
}
