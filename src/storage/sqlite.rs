use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::threat::{
    LogEntryRow, NewAnomaly, NewLogEntry, SourceStatus, ThreatSource,
};

use super::ThreatStore;

/// SQLite-backed store. One connection behind a mutex, WAL mode,
/// schema created on open.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS threat_sources (
                ip          TEXT PRIMARY KEY,
                country     TEXT,
                score       INTEGER NOT NULL DEFAULT 0,
                status      TEXT NOT NULL DEFAULT 'active',
                last_seen   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS anomalies (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                source_ip    TEXT NOT NULL REFERENCES threat_sources(ip) ON DELETE CASCADE,
                timestamp    TEXT NOT NULL,
                reason       TEXT NOT NULL,
                score_added  INTEGER NOT NULL,
                attacked_url TEXT NOT NULL,
                details      TEXT NOT NULL DEFAULT '',
                raw_event    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS log_entries (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                source_ip     TEXT REFERENCES threat_sources(ip) ON DELETE CASCADE,
                ip            TEXT NOT NULL,
                country       TEXT,
                url           TEXT NOT NULL,
                status_code   INTEGER NOT NULL,
                user_agent    TEXT,
                timestamp     TEXT NOT NULL,
                time_delta_ms INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_anomalies_timestamp ON anomalies(timestamp);
            CREATE INDEX IF NOT EXISTS idx_anomalies_source ON anomalies(source_ip);
            CREATE INDEX IF NOT EXISTS idx_log_entries_timestamp ON log_entries(timestamp);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn row_to_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreatSource> {
    let status_raw: String = row.get(3)?;
    Ok(ThreatSource {
        ip: row.get(0)?,
        country: row.get(1)?,
        score: row.get(2)?,
        status: SourceStatus::from_str_name(&status_raw).unwrap_or(SourceStatus::Active),
        last_seen: parse_timestamp(&row.get::<_, String>(4)?),
    })
}

impl ThreatStore for SqliteStore {
    fn get_or_create_source(
        &self,
        ip: &str,
        country: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(ThreatSource, bool)> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");

        let existing = conn
            .query_row(
                "SELECT ip, country, score, status, last_seen FROM threat_sources WHERE ip = ?1",
                params![ip],
                row_to_source,
            )
            .optional()?;

        if let Some(source) = existing {
            return Ok((source, false));
        }

        let source = ThreatSource::new(ip, country, now);
        conn.execute(
            "INSERT INTO threat_sources (ip, country, score, status, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source.ip,
                source.country,
                source.score,
                source.status.to_string(),
                source.last_seen.to_rfc3339(),
            ],
        )?;
        Ok((source, true))
    }

    fn save_source(&self, source: &ThreatSource) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT INTO threat_sources (ip, country, score, status, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(ip) DO UPDATE SET
                 country = excluded.country,
                 score = excluded.score,
                 status = excluded.status,
                 last_seen = excluded.last_seen",
            params![
                source.ip,
                source.country,
                source.score,
                source.status.to_string(),
                source.last_seen.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn create_anomaly(&self, anomaly: &NewAnomaly) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT INTO anomalies
             (source_ip, timestamp, reason, score_added, attacked_url, details, raw_event)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                anomaly.source_ip,
                anomaly.timestamp.to_rfc3339(),
                anomaly.reason.to_string(),
                anomaly.score_added,
                anomaly.attacked_url,
                anomaly.details,
                anomaly.raw_event,
            ],
        )?;
        Ok(())
    }

    fn create_log_entry(&self, entry: &NewLogEntry) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT INTO log_entries
             (source_ip, ip, country, url, status_code, user_agent, timestamp, time_delta_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.source_ip,
                entry.ip,
                entry.country,
                entry.url,
                entry.status_code,
                entry.user_agent,
                entry.timestamp.to_rfc3339(),
                entry.time_delta_ms,
            ],
        )?;
        Ok(())
    }

    fn reset_blocked(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let changed = conn.execute(
            "UPDATE threat_sources SET status = 'active', score = 0 WHERE status = 'blocked'",
            [],
        )?;
        Ok(changed)
    }

    fn wipe_all(&self) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        // Cascades clear anomalies and source-bound log entries; the
        // extra delete catches log rows with no source reference.
        conn.execute_batch(
            "DELETE FROM threat_sources;
             DELETE FROM log_entries;
             DELETE FROM anomalies;",
        )?;
        Ok(())
    }

    fn blocked_sources(&self) -> Result<Vec<ThreatSource>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT ip, country, score, status, last_seen FROM threat_sources
             WHERE status = 'blocked' ORDER BY score DESC",
        )?;
        let rows = stmt.query_map([], row_to_source)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn count_log_entries_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM log_entries WHERE timestamp >= ?1",
            params![since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn anomalies_by_reason_since(&self, since: DateTime<Utc>) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT reason, COUNT(*) AS cnt FROM anomalies
             WHERE timestamp >= ?1 GROUP BY reason ORDER BY cnt DESC",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn top_attacked_urls_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT attacked_url, COUNT(*) AS cnt FROM anomalies
             WHERE timestamp >= ?1 GROUP BY attacked_url ORDER BY cnt DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339(), limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn top_countries_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT COALESCE(s.country, 'Unknown') AS country, COUNT(*) AS cnt
             FROM anomalies a JOIN threat_sources s ON s.ip = a.source_ip
             WHERE a.timestamp >= ?1 GROUP BY country ORDER BY cnt DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339(), limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn requests_by_country_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT COALESCE(country, 'Unknown') AS country, COUNT(*) AS cnt
             FROM log_entries WHERE timestamp >= ?1
             GROUP BY country ORDER BY cnt DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339(), limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn threat_score_timeline_since(&self, since: DateTime<Utc>) -> Result<Vec<(String, i64)>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        // RFC 3339 UTC timestamps truncate to minute precision at 16 chars.
        let mut stmt = conn.prepare(
            "SELECT substr(timestamp, 1, 16) AS minute, SUM(score_added)
             FROM anomalies WHERE timestamp >= ?1
             GROUP BY minute ORDER BY minute ASC",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn avg_time_delta_split(&self) -> Result<(f64, f64)> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let bot: f64 = conn.query_row(
            "SELECT COALESCE(AVG(time_delta_ms), 0) FROM log_entries
             WHERE time_delta_ms IS NOT NULL
               AND source_ip IN (SELECT DISTINCT source_ip FROM anomalies)",
            [],
            |row| row.get(0),
        )?;
        let human: f64 = conn.query_row(
            "SELECT COALESCE(AVG(time_delta_ms), 0) FROM log_entries
             WHERE time_delta_ms IS NOT NULL
               AND source_ip NOT IN (SELECT DISTINCT source_ip FROM anomalies)",
            [],
            |row| row.get(0),
        )?;
        Ok((bot, human))
    }

    fn recent_log_entries(&self, limit: usize) -> Result<Vec<LogEntryRow>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, source_ip, ip, country, url, status_code, user_agent,
                    timestamp, time_delta_ms
             FROM log_entries ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(LogEntryRow {
                id: row.get(0)?,
                source_ip: row.get(1)?,
                ip: row.get(2)?,
                country: row.get(3)?,
                url: row.get(4)?,
                status_code: row.get::<_, i64>(5)? as u16,
                user_agent: row.get(6)?,
                timestamp: parse_timestamp(&row.get::<_, String>(7)?),
                time_delta_ms: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::threat::AnomalyReason;

    fn store() -> SqliteStore {
        SqliteStore::new(":memory:").unwrap()
    }

    fn log_entry(ip: &str, now: DateTime<Utc>, delta: Option<i64>) -> NewLogEntry {
        NewLogEntry {
            source_ip: Some(ip.to_string()),
            ip: ip.to_string(),
            country: Some("DE".to_string()),
            url: "/".to_string(),
            status_code: 200,
            user_agent: None,
            timestamp: now,
            time_delta_ms: delta,
        }
    }

    #[test]
    fn test_get_or_create_round_trip() {
        let store = store();
        let now = Utc::now();

        let (created, fresh) = store.get_or_create_source("1.1.1.1", Some("AU"), now).unwrap();
        assert!(fresh);
        assert_eq!(created.score, 0);

        let (loaded, fresh) = store.get_or_create_source("1.1.1.1", None, now).unwrap();
        assert!(!fresh);
        assert_eq!(loaded.country.as_deref(), Some("AU"));
    }

    #[test]
    fn test_save_source_persists_score_and_status() {
        let store = store();
        let now = Utc::now();
        let (mut src, _) = store.get_or_create_source("1.1.1.1", None, now).unwrap();
        src.score = 120;
        src.status = SourceStatus::Blocked;
        store.save_source(&src).unwrap();

        let (loaded, _) = store.get_or_create_source("1.1.1.1", None, now).unwrap();
        assert_eq!(loaded.score, 120);
        assert!(loaded.is_blocked());
    }

    #[test]
    fn test_reset_blocked_zeroes_score() {
        let store = store();
        let now = Utc::now();
        let (mut src, _) = store.get_or_create_source("1.1.1.1", None, now).unwrap();
        src.score = 150;
        src.status = SourceStatus::Blocked;
        store.save_source(&src).unwrap();

        assert_eq!(store.reset_blocked().unwrap(), 1);
        let (loaded, _) = store.get_or_create_source("1.1.1.1", None, now).unwrap();
        assert_eq!(loaded.score, 0);
        assert_eq!(loaded.status, SourceStatus::Active);
    }

    #[test]
    fn test_wipe_cascades() {
        let store = store();
        let now = Utc::now();
        let (src, _) = store.get_or_create_source("1.1.1.1", None, now).unwrap();
        store
            .create_anomaly(&NewAnomaly {
                source_ip: src.ip.clone(),
                timestamp: now,
                reason: AnomalyReason::PathScanning,
                score_added: 30,
                attacked_url: "/admin".to_string(),
                details: String::new(),
                raw_event: "{}".to_string(),
            })
            .unwrap();
        store.create_log_entry(&log_entry("1.1.1.1", now, None)).unwrap();

        store.wipe_all().unwrap();
        assert!(store.blocked_sources().unwrap().is_empty());
        assert_eq!(store.count_log_entries_since(now - chrono::Duration::hours(1)).unwrap(), 0);
        assert!(store.anomalies_by_reason_since(now - chrono::Duration::hours(1)).unwrap().is_empty());
    }

    #[test]
    fn test_reporting_aggregates() {
        let store = store();
        let now = Utc::now();
        let since = now - chrono::Duration::hours(24);

        store.get_or_create_source("1.1.1.1", Some("DE"), now).unwrap();
        store.get_or_create_source("2.2.2.2", Some("FR"), now).unwrap();

        for (ip, url) in [("1.1.1.1", "/admin"), ("1.1.1.1", "/admin"), ("2.2.2.2", "/.env")] {
            store
                .create_anomaly(&NewAnomaly {
                    source_ip: ip.to_string(),
                    timestamp: now,
                    reason: AnomalyReason::PathScanning,
                    score_added: 30,
                    attacked_url: url.to_string(),
                    details: String::new(),
                    raw_event: "{}".to_string(),
                })
                .unwrap();
        }

        store.create_log_entry(&log_entry("1.1.1.1", now, Some(100))).unwrap();
        store.create_log_entry(&log_entry("1.1.1.1", now, None)).unwrap();

        assert_eq!(store.count_log_entries_since(since).unwrap(), 2);

        let by_reason = store.anomalies_by_reason_since(since).unwrap();
        assert_eq!(by_reason, vec![("path_scanning".to_string(), 3)]);

        let top_urls = store.top_attacked_urls_since(since, 5).unwrap();
        assert_eq!(top_urls[0], ("/admin".to_string(), 2));

        let top_countries = store.top_countries_since(since, 5).unwrap();
        assert_eq!(top_countries[0], ("DE".to_string(), 2));

        let timeline = store.threat_score_timeline_since(since).unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].1, 90);

        let (bot_avg, _human_avg) = store.avg_time_delta_split().unwrap();
        assert!((bot_avg - 100.0).abs() < f64::EPSILON);

        let recent = store.recent_log_entries(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].id > recent[1].id);
    }
}
