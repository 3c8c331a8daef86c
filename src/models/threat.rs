use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked source IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceStatus {
    /// Scored normally on every event.
    Active,
    /// Score crossed the blocking threshold; only an explicit reset
    /// moves the source back to `Active`.
    Blocked,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Active => write!(f, "active"),
            SourceStatus::Blocked => write!(f, "blocked"),
        }
    }
}

impl SourceStatus {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

/// Which detection rule produced an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyReason {
    /// Inter-request timing too fast for a human.
    RoboticActivity,
    /// Known scanner tool user agent (sqlmap, nikto, ...).
    ScannerUserAgent,
    /// Probing for sensitive or administrative paths.
    PathScanning,
    /// SQL injection pattern in URL or POST body.
    SqlInjection,
    /// Cross-site scripting pattern in URL or POST body.
    XssAttempt,
    /// Failed authentication against a login endpoint.
    LoginBruteForce,
    /// Payment request carrying a card number that fails the Luhn check.
    InvalidCardNumber,
}

impl fmt::Display for AnomalyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyReason::RoboticActivity => write!(f, "robotic_activity"),
            AnomalyReason::ScannerUserAgent => write!(f, "scanner_user_agent"),
            AnomalyReason::PathScanning => write!(f, "path_scanning"),
            AnomalyReason::SqlInjection => write!(f, "sql_injection"),
            AnomalyReason::XssAttempt => write!(f, "xss_attempt"),
            AnomalyReason::LoginBruteForce => write!(f, "login_bruteforce"),
            AnomalyReason::InvalidCardNumber => write!(f, "invalid_card_number"),
        }
    }
}

impl AnomalyReason {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "robotic_activity" => Some(Self::RoboticActivity),
            "scanner_user_agent" => Some(Self::ScannerUserAgent),
            "path_scanning" => Some(Self::PathScanning),
            "sql_injection" => Some(Self::SqlInjection),
            "xss_attempt" => Some(Self::XssAttempt),
            "login_bruteforce" => Some(Self::LoginBruteForce),
            "invalid_card_number" => Some(Self::InvalidCardNumber),
            _ => None,
        }
    }
}

/// Per-IP ledger entry: accumulated threat score plus blocking state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatSource {
    pub ip: String,
    pub country: Option<String>,
    pub score: i64,
    pub status: SourceStatus,
    pub last_seen: DateTime<Utc>,
}

impl ThreatSource {
    pub fn new(ip: &str, country: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            ip: ip.to_string(),
            country: country.map(|c| c.to_string()),
            score: 0,
            status: SourceStatus::Active,
            last_seen: now,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.status == SourceStatus::Blocked
    }
}

/// One rule firing, ready to be persisted against its source.
#[derive(Debug, Clone)]
pub struct NewAnomaly {
    pub source_ip: String,
    pub timestamp: DateTime<Utc>,
    pub reason: AnomalyReason,
    pub score_added: i64,
    pub attacked_url: String,
    pub details: String,
    pub raw_event: String,
}

/// Audit snapshot of one received event, written whether or not
/// any rule fired.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub source_ip: Option<String>,
    pub ip: String,
    pub country: Option<String>,
    pub url: String,
    pub status_code: u16,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub time_delta_ms: Option<i64>,
}

/// Persisted anomaly row, as read back for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRow {
    pub id: i64,
    pub source_ip: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub score_added: i64,
    pub attacked_url: String,
    pub details: String,
    pub raw_event: String,
}

/// Persisted log entry row, as read back for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntryRow {
    pub id: i64,
    pub source_ip: Option<String>,
    pub ip: String,
    pub country: Option<String>,
    pub url: String,
    pub status_code: u16,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub time_delta_ms: Option<i64>,
}
