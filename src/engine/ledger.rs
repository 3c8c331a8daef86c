use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::config::settings::ScoringConfig;
use crate::models::threat::{SourceStatus, ThreatSource};

/// Score decay for inactive sources: after more than the configured
/// window without an event, the score drops by the configured amount,
/// floored at zero. Decay applies to blocked sources too -- it can pull
/// their score back under the threshold, but never their status
/// (Blocked is monotonic; see `record_delta`).
pub fn apply_decay(entry: &mut ThreatSource, now: DateTime<Utc>, cfg: &ScoringConfig) {
    let idle = now - entry.last_seen;
    if idle > Duration::seconds(cfg.decay_after_secs as i64) {
        let before = entry.score;
        entry.score = (entry.score - cfg.decay_amount).max(0);
        if entry.score != before {
            info!(
                ip = %entry.ip,
                before = before,
                after = entry.score,
                "Threat score decayed after inactivity"
            );
        }
    }
}

/// Add a rule's score to the entry. Crossing the blocking threshold
/// flips the status to Blocked; nothing in the engine flips it back.
/// Returns true when this delta caused the transition.
pub fn record_delta(entry: &mut ThreatSource, delta: i64, cfg: &ScoringConfig) -> bool {
    entry.score += delta;
    if entry.score >= cfg.block_threshold && entry.status != SourceStatus::Blocked {
        entry.status = SourceStatus::Blocked;
        info!(ip = %entry.ip, score = entry.score, "Source blocked");
        return true;
    }
    false
}

/// Update the last-seen timestamp. Performed on every event, blocked
/// sources included.
pub fn touch(entry: &mut ThreatSource, now: DateTime<Utc>) {
    entry.last_seen = now;
}
