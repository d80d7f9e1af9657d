use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tagmon_common::types::QualityClass;

pub const DEFAULT_BUCKET_SPAN_MS: i64 = 5_000;
pub const DEFAULT_HORIZON_MS: i64 = 60_000;

/// Number of bucket-level data points reported in compact snapshots.
pub const SERIES_LEN: usize = 12;

/// One tumbling aggregation bucket. Buckets are only ever mutated through
/// [`MetricsWindow::current_bucket`], so a bucket whose span has elapsed
/// stays frozen until eviction.
#[derive(Debug, Clone)]
pub struct MetricsBucket {
    pub start: DateTime<Utc>,
    pub reads: u64,
    pub writes: u64,
    pub notifications: u64,
    pub good: u64,
    pub bad: u64,
    pub uncertain: u64,
    pub errors: u64,
    pub latencies_ms: Vec<f64>,
}

impl MetricsBucket {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            reads: 0,
            writes: 0,
            notifications: 0,
            good: 0,
            bad: 0,
            uncertain: 0,
            errors: 0,
            latencies_ms: Vec::new(),
        }
    }
}

/// Aggregated rates and latency percentiles over a query window.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct MetricsSummary {
    pub window_ms: i64,
    pub reads_per_sec: f64,
    pub writes_per_sec: f64,
    pub notifications_per_sec: f64,
    pub good_per_sec: f64,
    pub bad_per_sec: f64,
    pub uncertain_per_sec: f64,
    pub errors_per_sec: f64,
    /// bad / (good + bad + uncertain) × 100; zero without classified samples.
    pub bad_pct: f64,
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_max_ms: Option<f64>,
    pub samples: usize,
}

/// One bucket's rates, for short time-series charting.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct BucketRate {
    pub start: DateTime<Utc>,
    pub reads_per_sec: f64,
    pub errors_per_sec: f64,
}

/// Tumbling-bucket telemetry over a bounded horizon (default 12 × 5 s).
///
/// All methods take an explicit `now` so behavior is reproducible; the
/// read cycle passes wall-clock time.
pub struct MetricsWindow {
    span_ms: i64,
    horizon_ms: i64,
    buckets: VecDeque<MetricsBucket>,
}

impl Default for MetricsWindow {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_SPAN_MS, DEFAULT_HORIZON_MS)
    }
}

impl MetricsWindow {
    pub fn new(span_ms: i64, horizon_ms: i64) -> Self {
        Self {
            span_ms: span_ms.max(1),
            horizon_ms: horizon_ms.max(span_ms.max(1)),
            buckets: VecDeque::new(),
        }
    }

    pub fn horizon_ms(&self) -> i64 {
        self.horizon_ms
    }

    fn aligned(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ms = now.timestamp_millis();
        let start = ms - ms.rem_euclid(self.span_ms);
        Utc.timestamp_millis_opt(start).single().unwrap_or(now)
    }

    /// The bucket covering `now`, creating it (and any intermediate empty
    /// buckets, so quiet periods chart as zeros rather than gaps) on first
    /// touch, then evicting everything older than the horizon.
    pub fn current_bucket(&mut self, now: DateTime<Utc>) -> &mut MetricsBucket {
        let start = self.aligned(now);
        match self.buckets.back() {
            None => self.buckets.push_back(MetricsBucket::new(start)),
            Some(back) if back.start < start => {
                let mut s = back.start + Duration::milliseconds(self.span_ms);
                while s <= start {
                    self.buckets.push_back(MetricsBucket::new(s));
                    s = s + Duration::milliseconds(self.span_ms);
                }
            }
            _ => {}
        }
        self.evict(now);
        let idx = self
            .buckets
            .iter()
            .position(|b| b.start == start)
            .unwrap_or(self.buckets.len().saturating_sub(1));
        &mut self.buckets[idx]
    }

    /// Drops every bucket whose start is older than `now − horizon`.
    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::milliseconds(self.horizon_ms);
        while let Some(front) = self.buckets.front() {
            if front.start < cutoff {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>, latency_ms: f64, quality: QualityClass) {
        let bucket = self.current_bucket(now);
        bucket.reads += 1;
        bucket.notifications += 1;
        bucket.latencies_ms.push(latency_ms);
        match quality {
            QualityClass::Good => bucket.good += 1,
            QualityClass::Bad => bucket.bad += 1,
            QualityClass::Uncertain => bucket.uncertain += 1,
        }
    }

    /// A failed read contributes neither latency nor quality.
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.current_bucket(now).errors += 1;
    }

    pub fn record_write(&mut self, now: DateTime<Utc>) {
        self.current_bucket(now).writes += 1;
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn buckets(&self) -> impl Iterator<Item = &MetricsBucket> {
        self.buckets.iter()
    }

    /// Sums all buckets within the trailing `window_ms` and converts the
    /// counters to per-second rates.
    pub fn summarize(&self, window_ms: i64, now: DateTime<Utc>) -> MetricsSummary {
        let cutoff = now - Duration::milliseconds(window_ms);
        let seconds = (window_ms as f64 / 1000.0).max(f64::MIN_POSITIVE);

        let mut reads = 0u64;
        let mut writes = 0u64;
        let mut notifications = 0u64;
        let mut good = 0u64;
        let mut bad = 0u64;
        let mut uncertain = 0u64;
        let mut errors = 0u64;
        let mut latencies: Vec<f64> = Vec::new();

        for bucket in self.buckets.iter().filter(|b| b.start >= cutoff) {
            reads += bucket.reads;
            writes += bucket.writes;
            notifications += bucket.notifications;
            good += bucket.good;
            bad += bucket.bad;
            uncertain += bucket.uncertain;
            errors += bucket.errors;
            latencies.extend_from_slice(&bucket.latencies_ms);
        }

        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let classified = good + bad + uncertain;
        let bad_pct = if classified == 0 {
            0.0
        } else {
            bad as f64 / classified as f64 * 100.0
        };

        MetricsSummary {
            window_ms,
            reads_per_sec: reads as f64 / seconds,
            writes_per_sec: writes as f64 / seconds,
            notifications_per_sec: notifications as f64 / seconds,
            good_per_sec: good as f64 / seconds,
            bad_per_sec: bad as f64 / seconds,
            uncertain_per_sec: uncertain as f64 / seconds,
            errors_per_sec: errors as f64 / seconds,
            bad_pct,
            latency_p50_ms: percentile(&latencies, 0.50),
            latency_p95_ms: percentile(&latencies, 0.95),
            latency_max_ms: latencies.last().copied(),
            samples: latencies.len(),
        }
    }

    /// Per-bucket rates for the most recent `count` buckets, oldest first.
    pub fn series(&self, count: usize) -> Vec<BucketRate> {
        let span_secs = (self.span_ms as f64 / 1000.0).max(f64::MIN_POSITIVE);
        let skip = self.buckets.len().saturating_sub(count);
        self.buckets
            .iter()
            .skip(skip)
            .map(|b| BucketRate {
                start: b.start,
                reads_per_sec: b.reads as f64 / span_secs,
                errors_per_sec: b.errors as f64 / span_secs,
            })
            .collect()
    }
}

/// Nearest-rank selection on a sorted slice: `idx = floor(q × (n−1))`.
fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = (q * (sorted.len() as f64 - 1.0)).floor() as usize;
    sorted.get(idx).copied()
}
