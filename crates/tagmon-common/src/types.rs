use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Quality classification of a protocol-level read status.
///
/// # Examples
///
/// ```
/// use tagmon_common::types::QualityClass;
///
/// assert_eq!(QualityClass::classify("Good"), QualityClass::Good);
/// assert_eq!(QualityClass::classify("BadNodeIdUnknown"), QualityClass::Bad);
/// assert_eq!(QualityClass::classify("UncertainLastUsableValue"), QualityClass::Uncertain);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QualityClass {
    Good,
    Uncertain,
    Bad,
}

impl QualityClass {
    /// Classifies a status-code name by substring: "Bad" wins over
    /// "Uncertain"; anything else is treated as good.
    pub fn classify(status_name: &str) -> Self {
        if status_name.contains("Bad") {
            QualityClass::Bad
        } else if status_name.contains("Uncertain") {
            QualityClass::Uncertain
        } else {
            QualityClass::Good
        }
    }
}

/// Severity-ordered threshold breach categories. The four kinds are
/// independent for deduplication purposes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DeviationKind {
    Low,
    LowLow,
    High,
    HighHigh,
}

impl DeviationKind {
    pub const ALL: [DeviationKind; 4] = [
        DeviationKind::LowLow,
        DeviationKind::Low,
        DeviationKind::High,
        DeviationKind::HighHigh,
    ];

    /// Outer kinds (low-low, high-high) are critical; inner kinds are warnings.
    pub fn severity(&self) -> Severity {
        match self {
            DeviationKind::LowLow | DeviationKind::HighHigh => Severity::Critical,
            DeviationKind::Low | DeviationKind::High => Severity::Warning,
        }
    }

    /// Human-readable breach direction used in notification bodies.
    pub fn describe(&self) -> &'static str {
        match self {
            DeviationKind::LowLow => "below low-low limit",
            DeviationKind::Low => "below low limit",
            DeviationKind::High => "above high limit",
            DeviationKind::HighHigh => "above high-high limit",
        }
    }
}

impl std::fmt::Display for DeviationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviationKind::LowLow => write!(f, "low_low"),
            DeviationKind::Low => write!(f, "low"),
            DeviationKind::High => write!(f, "high"),
            DeviationKind::HighHigh => write!(f, "high_high"),
        }
    }
}

impl std::str::FromStr for DeviationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low_low" | "ll" => Ok(DeviationKind::LowLow),
            "low" | "l" => Ok(DeviationKind::Low),
            "high" | "h" => Ok(DeviationKind::High),
            "high_high" | "hh" => Ok(DeviationKind::HighHigh),
            _ => Err(format!("unknown deviation kind: {s}")),
        }
    }
}

/// Alert severity level, ordered from lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Connection lifecycle state of a device client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Alert record persisted through the notification store before any
/// outbound message is sent. Carries the cumulative occurrence count at
/// the time of the breach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub client_id: String,
    /// Canonical tag name as resolved against the limit table.
    pub tag: String,
    pub kind: DeviationKind,
    pub value: f64,
    pub occurrences: u64,
    pub unit: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl AlertRecord {
    /// Subject line for outbound notifications.
    pub fn subject(&self) -> String {
        format!(
            "[tagmon] {} {} {}",
            self.client_id,
            self.tag,
            self.kind.severity()
        )
    }
}

/// One poll cycle's successful values, handed to the persistence sink.
/// Values are keyed by the raw node identifier used on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleDocument {
    pub id: String,
    pub client_id: String,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

/// Per-client status snapshot served by the HTTP API. Always reflects the
/// last known state, even mid-reconnect.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ClientStatus {
    pub client_id: String,
    pub endpoint: String,
    pub state: ConnectionState,
    pub connected: bool,
    /// Number of tags the scheduler is currently polling.
    pub active_tags: usize,
    pub last_session_at: Option<DateTime<Utc>>,
    pub session_secs: Option<i64>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<f64>,
    pub reads_total: u64,
    /// Ticks skipped because the previous cycle was still in flight.
    pub skipped_ticks: u64,
    /// Read failure counts keyed by raw node identifier.
    pub failures: HashMap<String, u64>,
    pub last_error: Option<String>,
}

/// Per-tag alert statistics, merged from the engine's counters and the
/// shared dedup timestamps.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct AlertStatSnapshot {
    pub tag: String,
    pub occurrences: u64,
    pub last_value: f64,
    pub last_kind: Option<DeviationKind>,
    /// Last outbound send per deviation kind.
    pub last_sent: HashMap<String, DateTime<Utc>>,
}
