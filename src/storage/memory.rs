use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::models::threat::{
    AnomalyRow, LogEntryRow, NewAnomaly, NewLogEntry, SourceStatus, ThreatSource,
};

use super::ThreatStore;

/// In-process store. Backs tests and small single-node deployments
/// where durability across restarts does not matter.
#[derive(Default)]
pub struct MemoryStore {
    sources: RwLock<HashMap<String, ThreatSource>>,
    anomalies: RwLock<Vec<AnomalyRow>>,
    log_entries: RwLock<Vec<LogEntryRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All anomalies recorded so far (test helper).
    pub fn anomaly_count(&self) -> usize {
        self.anomalies.read().len()
    }

    /// All log entries recorded so far (test helper).
    pub fn log_entry_count(&self) -> usize {
        self.log_entries.read().len()
    }
}

fn minute_key(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339().chars().take(16).collect()
}

fn count_grouped<I: Iterator<Item = String>>(keys: I, limit: usize) -> Vec<(String, u64)> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    let mut out: Vec<_> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out.truncate(limit);
    out
}

impl ThreatStore for MemoryStore {
    fn get_or_create_source(
        &self,
        ip: &str,
        country: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(ThreatSource, bool)> {
        let mut sources = self.sources.write();
        if let Some(existing) = sources.get(ip) {
            return Ok((existing.clone(), false));
        }
        let source = ThreatSource::new(ip, country, now);
        sources.insert(ip.to_string(), source.clone());
        Ok((source, true))
    }

    fn save_source(&self, source: &ThreatSource) -> Result<()> {
        self.sources
            .write()
            .insert(source.ip.clone(), source.clone());
        Ok(())
    }

    fn create_anomaly(&self, anomaly: &NewAnomaly) -> Result<()> {
        let mut anomalies = self.anomalies.write();
        let id = anomalies.len() as i64 + 1;
        anomalies.push(AnomalyRow {
            id,
            source_ip: anomaly.source_ip.clone(),
            timestamp: anomaly.timestamp,
            reason: anomaly.reason.to_string(),
            score_added: anomaly.score_added,
            attacked_url: anomaly.attacked_url.clone(),
            details: anomaly.details.clone(),
            raw_event: anomaly.raw_event.clone(),
        });
        Ok(())
    }

    fn create_log_entry(&self, entry: &NewLogEntry) -> Result<()> {
        let mut log_entries = self.log_entries.write();
        let id = log_entries.len() as i64 + 1;
        log_entries.push(LogEntryRow {
            id,
            source_ip: entry.source_ip.clone(),
            ip: entry.ip.clone(),
            country: entry.country.clone(),
            url: entry.url.clone(),
            status_code: entry.status_code,
            user_agent: entry.user_agent.clone(),
            timestamp: entry.timestamp,
            time_delta_ms: entry.time_delta_ms,
        });
        Ok(())
    }

    fn reset_blocked(&self) -> Result<usize> {
        let mut sources = self.sources.write();
        let mut reset = 0;
        for source in sources.values_mut() {
            if source.status == SourceStatus::Blocked {
                source.status = SourceStatus::Active;
                source.score = 0;
                reset += 1;
            }
        }
        Ok(reset)
    }

    fn wipe_all(&self) -> Result<()> {
        self.sources.write().clear();
        self.anomalies.write().clear();
        self.log_entries.write().clear();
        Ok(())
    }

    fn blocked_sources(&self) -> Result<Vec<ThreatSource>> {
        let mut blocked: Vec<_> = self
            .sources
            .read()
            .values()
            .filter(|s| s.status == SourceStatus::Blocked)
            .cloned()
            .collect();
        blocked.sort_by(|a, b| b.score.cmp(&a.score));
        Ok(blocked)
    }

    fn count_log_entries_since(&self, since: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .log_entries
            .read()
            .iter()
            .filter(|e| e.timestamp >= since)
            .count() as u64)
    }

    fn anomalies_by_reason_since(&self, since: DateTime<Utc>) -> Result<Vec<(String, u64)>> {
        let anomalies = self.anomalies.read();
        Ok(count_grouped(
            anomalies
                .iter()
                .filter(|a| a.timestamp >= since)
                .map(|a| a.reason.clone()),
            usize::MAX,
        ))
    }

    fn top_attacked_urls_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, u64)>> {
        let anomalies = self.anomalies.read();
        Ok(count_grouped(
            anomalies
                .iter()
                .filter(|a| a.timestamp >= since)
                .map(|a| a.attacked_url.clone()),
            limit,
        ))
    }

    fn top_countries_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, u64)>> {
        let sources = self.sources.read();
        let anomalies = self.anomalies.read();
        Ok(count_grouped(
            anomalies.iter().filter(|a| a.timestamp >= since).map(|a| {
                sources
                    .get(&a.source_ip)
                    .and_then(|s| s.country.clone())
                    .unwrap_or_else(|| "Unknown".to_string())
            }),
            limit,
        ))
    }

    fn requests_by_country_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, u64)>> {
        let log_entries = self.log_entries.read();
        Ok(count_grouped(
            log_entries
                .iter()
                .filter(|e| e.timestamp >= since)
                .map(|e| e.country.clone().unwrap_or_else(|| "Unknown".to_string())),
            limit,
        ))
    }

    fn threat_score_timeline_since(&self, since: DateTime<Utc>) -> Result<Vec<(String, i64)>> {
        let anomalies = self.anomalies.read();
        let mut buckets: HashMap<String, i64> = HashMap::new();
        for anomaly in anomalies.iter().filter(|a| a.timestamp >= since) {
            *buckets.entry(minute_key(anomaly.timestamp)).or_insert(0) += anomaly.score_added;
        }
        let mut out: Vec<_> = buckets.into_iter().collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn avg_time_delta_split(&self) -> Result<(f64, f64)> {
        let anomalies = self.anomalies.read();
        let log_entries = self.log_entries.read();

        let flagged: std::collections::HashSet<&str> =
            anomalies.iter().map(|a| a.source_ip.as_str()).collect();

        let mut bot = (0i64, 0u64);
        let mut human = (0i64, 0u64);
        for entry in log_entries.iter() {
            let Some(delta) = entry.time_delta_ms else {
                continue;
            };
            let is_bot = entry
                .source_ip
                .as_deref()
                .is_some_and(|ip| flagged.contains(ip));
            let bucket = if is_bot { &mut bot } else { &mut human };
            bucket.0 += delta;
            bucket.1 += 1;
        }

        let avg = |(sum, n): (i64, u64)| if n == 0 { 0.0 } else { sum as f64 / n as f64 };
        Ok((avg(bot), avg(human)))
    }

    fn recent_log_entries(&self, limit: usize) -> Result<Vec<LogEntryRow>> {
        let log_entries = self.log_entries.read();
        Ok(log_entries.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::threat::AnomalyReason;

    #[test]
    fn test_get_or_create_reports_creation_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let (_, created) = store.get_or_create_source("10.0.0.1", None, now).unwrap();
        assert!(created);
        let (_, created) = store.get_or_create_source("10.0.0.1", None, now).unwrap();
        assert!(!created);
    }

    #[test]
    fn test_reset_blocked_only_touches_blocked() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let (mut a, _) = store.get_or_create_source("10.0.0.1", None, now).unwrap();
        a.score = 150;
        a.status = SourceStatus::Blocked;
        store.save_source(&a).unwrap();
        let (mut b, _) = store.get_or_create_source("10.0.0.2", None, now).unwrap();
        b.score = 40;
        store.save_source(&b).unwrap();

        assert_eq!(store.reset_blocked().unwrap(), 1);
        let (a, _) = store.get_or_create_source("10.0.0.1", None, now).unwrap();
        assert_eq!((a.score, a.status), (0, SourceStatus::Active));
        let (b, _) = store.get_or_create_source("10.0.0.2", None, now).unwrap();
        assert_eq!(b.score, 40);
    }

    #[test]
    fn test_avg_time_delta_split() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.get_or_create_source("10.0.0.1", None, now).unwrap();
        store.get_or_create_source("10.0.0.2", None, now).unwrap();
        store
            .create_anomaly(&NewAnomaly {
                source_ip: "10.0.0.1".to_string(),
                timestamp: now,
                reason: AnomalyReason::RoboticActivity,
                score_added: 25,
                attacked_url: "/".to_string(),
                details: String::new(),
                raw_event: "{}".to_string(),
            })
            .unwrap();

        for (ip, delta) in [("10.0.0.1", Some(50)), ("10.0.0.2", Some(4000)), ("10.0.0.2", None)] {
            store
                .create_log_entry(&NewLogEntry {
                    source_ip: Some(ip.to_string()),
                    ip: ip.to_string(),
                    country: None,
                    url: "/".to_string(),
                    status_code: 200,
                    user_agent: None,
                    timestamp: now,
                    time_delta_ms: delta,
                })
                .unwrap();
        }

        let (bot, human) = store.avg_time_delta_split().unwrap();
        assert!((bot - 50.0).abs() < f64::EPSILON);
        assert!((human - 4000.0).abs() < f64::EPSILON);
    }
}
