use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::settings::ScoringConfig;
use crate::models::event::{NormalizedEvent, RawEvent};
use crate::models::threat::{NewAnomaly, NewLogEntry, SourceStatus};
use crate::storage::ThreatStore;

use super::ledger;
use super::rules;

/// What one `analyze` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    /// Event carried no source IP; nothing was written.
    Skipped,
    /// Event was logged and (unless the source was already blocked) scored.
    Analyzed {
        ip: String,
        score: i64,
        status: SourceStatus,
        anomalies: usize,
    },
}

/// The scoring engine: normalizes events, drives the source ledger,
/// runs the rule library, and persists the audit trail through the
/// storage port.
///
/// Events for different IPs score in parallel; events for the same IP
/// are serialized on a per-IP mutex so the read-modify-write on the
/// ledger entry (and the threshold check inside it) stays atomic.
pub struct ThreatAnalyzer {
    store: Arc<dyn ThreatStore>,
    config: ScoringConfig,
    source_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ThreatAnalyzer {
    pub fn new(store: Arc<dyn ThreatStore>, config: ScoringConfig) -> Self {
        info!(
            block_threshold = config.block_threshold,
            decay_after_secs = config.decay_after_secs,
            robotic_threshold_ms = config.robotic_threshold_ms,
            "Threat analyzer initialized"
        );
        Self {
            store,
            config,
            source_locks: DashMap::new(),
        }
    }

    /// Score one inbound event.
    ///
    /// Always writes exactly one raw log entry for events carrying an
    /// IP, even when the source is already blocked. Storage failures
    /// abort the call before the ledger entry is saved, so a failed
    /// event never leaves a half-applied score.
    pub fn analyze(&self, event: &RawEvent) -> Result<AnalysisOutcome> {
        let Some(ip) = event.ip.as_deref().filter(|ip| !ip.is_empty()) else {
            debug!("Dropping event without source IP");
            return Ok(AnalysisOutcome::Skipped);
        };

        let lock = self
            .source_locks
            .entry(ip.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        let now = Utc::now();
        let (mut entry, created) = self
            .store
            .get_or_create_source(ip, event.country.as_deref(), now)
            .context("loading threat source")?;

        let time_delta_ms = if created {
            None
        } else {
            Some((now - entry.last_seen).num_milliseconds())
        };

        if !created {
            ledger::apply_decay(&mut entry, now, &self.config);
        }

        let normalized = NormalizedEvent::from_raw(event, created, time_delta_ms);

        self.store
            .create_log_entry(&NewLogEntry {
                source_ip: Some(entry.ip.clone()),
                ip: entry.ip.clone(),
                country: entry.country.clone(),
                url: normalized.url.clone(),
                status_code: normalized.status_code,
                user_agent: event.user_agent.clone(),
                timestamp: now,
                time_delta_ms,
            })
            .context("writing raw log entry")?;

        if entry.is_blocked() {
            // Blocked sources keep their audit trail current but are
            // not re-scored.
            ledger::touch(&mut entry, now);
            self.store.save_source(&entry).context("saving threat source")?;
            debug!(ip = %entry.ip, "Event from blocked source logged without scoring");
            return Ok(AnalysisOutcome::Analyzed {
                ip: entry.ip,
                score: entry.score,
                status: SourceStatus::Blocked,
                anomalies: 0,
            });
        }

        let detections = rules::evaluate(&normalized, &self.config);
        let raw_event =
            serde_json::to_string(event).context("serializing raw event for audit")?;

        for detection in &detections {
            debug!(
                ip = %entry.ip,
                reason = %detection.reason,
                score = detection.score,
                url = %normalized.url,
                "Rule fired"
            );
            self.store
                .create_anomaly(&NewAnomaly {
                    source_ip: entry.ip.clone(),
                    timestamp: now,
                    reason: detection.reason,
                    score_added: detection.score,
                    attacked_url: normalized.url.clone(),
                    details: detection.details.clone(),
                    raw_event: raw_event.clone(),
                })
                .context("writing anomaly")?;
            ledger::record_delta(&mut entry, detection.score, &self.config);
        }

        ledger::touch(&mut entry, now);
        self.store.save_source(&entry).context("saving threat source")?;

        Ok(AnalysisOutcome::Analyzed {
            ip: entry.ip,
            score: entry.score,
            status: entry.status,
            anomalies: detections.len(),
        })
    }
}
