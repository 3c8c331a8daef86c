pub mod memory;
pub mod sqlite;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::threat::{LogEntryRow, NewAnomaly, NewLogEntry, ThreatSource};

/// Durable storage contract consumed by the scoring engine and the
/// reporting endpoints. The engine only ever talks to this trait; which
/// backend sits behind it is wiring's problem.
///
/// Callers serialize all writes for one source IP (the engine holds a
/// per-IP lock around its get/score/save sequence), so implementations
/// only need internal consistency per call, not cross-call transactions.
pub trait ThreatStore: Send + Sync {
    /// Fetch the ledger entry for `ip`, creating it (score 0, Active,
    /// last_seen = `now`) if this IP has never been seen. The boolean is
    /// true when the entry was just created.
    fn get_or_create_source(
        &self,
        ip: &str,
        country: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(ThreatSource, bool)>;

    /// Upsert the ledger entry.
    fn save_source(&self, source: &ThreatSource) -> Result<()>;

    /// Append one immutable anomaly record.
    fn create_anomaly(&self, anomaly: &NewAnomaly) -> Result<()>;

    /// Append one immutable raw log record.
    fn create_log_entry(&self, entry: &NewLogEntry) -> Result<()>;

    /// Admin reset: every blocked source back to Active with score 0.
    /// Returns how many sources were reset.
    fn reset_blocked(&self) -> Result<usize>;

    /// Admin wipe: drop all sources and, with them, their anomalies and
    /// log entries.
    fn wipe_all(&self) -> Result<()>;

    // -----------------------------------------------------------------------
    // Reporting queries (consumed by the dashboard collaborator)
    // -----------------------------------------------------------------------

    /// Blocked sources, highest score first.
    fn blocked_sources(&self) -> Result<Vec<ThreatSource>>;

    /// Total log entries received at or after `since`.
    fn count_log_entries_since(&self, since: DateTime<Utc>) -> Result<u64>;

    /// Anomaly counts grouped by rule name, most frequent first.
    fn anomalies_by_reason_since(&self, since: DateTime<Utc>) -> Result<Vec<(String, u64)>>;

    /// Most-attacked URLs by anomaly count.
    fn top_attacked_urls_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, u64)>>;

    /// Countries ranked by anomaly count.
    fn top_countries_since(&self, since: DateTime<Utc>, limit: usize)
        -> Result<Vec<(String, u64)>>;

    /// Countries ranked by raw request count.
    fn requests_by_country_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, u64)>>;

    /// Per-minute sum of anomaly scores, oldest first. The minute key is
    /// the RFC 3339 timestamp truncated to minute precision.
    fn threat_score_timeline_since(&self, since: DateTime<Utc>) -> Result<Vec<(String, i64)>>;

    /// Average inter-request gap split into (sources with anomalies,
    /// sources without). First-sight entries with no delta are excluded.
    fn avg_time_delta_split(&self) -> Result<(f64, f64)>;

    /// Most recent log entries, newest first.
    fn recent_log_entries(&self, limit: usize) -> Result<Vec<LogEntryRow>>;
}
