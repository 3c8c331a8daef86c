use crate::config::settings::ScoringConfig;
use crate::models::event::NormalizedEvent;
use crate::models::threat::AnomalyReason;

/// One rule firing: what was detected, how much it costs, and the evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub reason: AnomalyReason,
    pub score: i64,
    pub details: String,
}

// ---------------------------------------------------------------------------
// Rule scores
// ---------------------------------------------------------------------------

const ROBOTIC_ACTIVITY_SCORE: i64 = 25;
const SCANNER_UA_SCORE: i64 = 40;
const SQL_INJECTION_SCORE: i64 = 80;
const XSS_SCORE: i64 = 60;
const LOGIN_BRUTEFORCE_SCORE: i64 = 15;
const INVALID_CARD_SCORE: i64 = 30;

/// How a path-scanning pattern matches against the URL.
#[derive(Debug, Clone, Copy)]
enum PathMatch {
    Contains(&'static str),
    EndsWith(&'static str),
}

impl PathMatch {
    fn matches(&self, url: &str) -> bool {
        match self {
            PathMatch::Contains(needle) => url.contains(needle),
            PathMatch::EndsWith(suffix) => url.ends_with(suffix),
        }
    }
}

/// Ordered path-scanning patterns: the first match wins and stops
/// evaluation, so higher-severity probes must be listed first.
const PATH_PATTERNS: &[(PathMatch, i64)] = &[
    (PathMatch::Contains("/.git/"), 50),
    (PathMatch::Contains("/.env"), 50),
    (PathMatch::Contains("/etc/passwd"), 50),
    (PathMatch::EndsWith(".ini"), 40),
    (PathMatch::Contains("/admin"), 30),
    (PathMatch::Contains("/admin.php"), 30),
    (PathMatch::Contains("/wp-admin"), 30),
    (PathMatch::Contains("/login"), 25),
    (PathMatch::Contains("/auth"), 25),
    (PathMatch::EndsWith(".php"), 20),
];

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Run all detection rules against one normalized event, in fixed order.
///
/// Path scanning short-circuits on its first matching pattern; every
/// other rule is independent and may fire on the same event. Rules never
/// fail: malformed input counts as suspicious or is ignored, depending
/// on the rule.
pub fn evaluate(ev: &NormalizedEvent, cfg: &ScoringConfig) -> Vec<Detection> {
    let mut detections = Vec::new();

    if let Some(d) = robotic_activity(ev, cfg) {
        detections.push(d);
    }
    if let Some(d) = scanner_user_agent(ev, cfg) {
        detections.push(d);
    }
    if let Some(d) = path_scanning(ev) {
        detections.push(d);
    }
    if let Some(d) = sql_injection(ev) {
        detections.push(d);
    }
    if let Some(d) = xss_attempt(ev) {
        detections.push(d);
    }
    if let Some(d) = login_bruteforce(ev) {
        detections.push(d);
    }
    if let Some(d) = invalid_card_number(ev) {
        detections.push(d);
    }

    detections
}

/// Inter-request gap too short for a human. Never fires on the very
/// first event for a source (no prior timestamp to compare against).
fn robotic_activity(ev: &NormalizedEvent, cfg: &ScoringConfig) -> Option<Detection> {
    if ev.is_first_seen {
        return None;
    }
    let delta = ev.time_delta_ms?;
    if delta < cfg.robotic_threshold_ms {
        return Some(Detection {
            reason: AnomalyReason::RoboticActivity,
            score: ROBOTIC_ACTIVITY_SCORE,
            details: format!("Time between requests: {}ms", delta),
        });
    }
    None
}

/// Denylisted scanner tool substring in the user agent.
fn scanner_user_agent(ev: &NormalizedEvent, cfg: &ScoringConfig) -> Option<Detection> {
    let ua_lower = ev.user_agent.to_lowercase();
    if cfg.scanner_user_agents.iter().any(|bad| ua_lower.contains(bad.as_str())) {
        return Some(Detection {
            reason: AnomalyReason::ScannerUserAgent,
            score: SCANNER_UA_SCORE,
            details: ev.user_agent.clone(),
        });
    }
    None
}

/// Probe for sensitive or administrative paths. First pattern wins.
fn path_scanning(ev: &NormalizedEvent) -> Option<Detection> {
    for (pattern, severity) in PATH_PATTERNS {
        if pattern.matches(&ev.url) {
            return Some(Detection {
                reason: AnomalyReason::PathScanning,
                score: *severity,
                details: format!("Suspicious path: {}", ev.url),
            });
        }
    }
    None
}

/// SQL injection markers in the URL or POST body. The URL is checked
/// first and takes precedence as evidence when both match.
fn sql_injection(ev: &NormalizedEvent) -> Option<Detection> {
    for haystack in [&ev.url, &ev.post_data] {
        if has_sql_pattern(haystack) {
            return Some(Detection {
                reason: AnomalyReason::SqlInjection,
                score: SQL_INJECTION_SCORE,
                details: haystack.to_string(),
            });
        }
    }
    None
}

/// XSS markers in the URL or POST body, same evidence precedence as
/// SQL injection.
fn xss_attempt(ev: &NormalizedEvent) -> Option<Detection> {
    for haystack in [&ev.url, &ev.post_data] {
        if has_xss_pattern(haystack) {
            return Some(Detection {
                reason: AnomalyReason::XssAttempt,
                score: XSS_SCORE,
                details: haystack.to_string(),
            });
        }
    }
    None
}

/// Rejected credentials against a login endpoint.
fn login_bruteforce(ev: &NormalizedEvent) -> Option<Detection> {
    if ev.url.contains("login") && ev.status_code == 401 {
        return Some(Detection {
            reason: AnomalyReason::LoginBruteForce,
            score: LOGIN_BRUTEFORCE_SCORE,
            details: format!("401 response on {}", ev.url),
        });
    }
    None
}

/// Payment endpoint POST whose body fails the Luhn checksum.
/// Non-numeric bodies count as failing, not as errors.
fn invalid_card_number(ev: &NormalizedEvent) -> Option<Detection> {
    if ev.url.contains("payment") && !ev.post_data.is_empty() && !luhn_valid(&ev.post_data) {
        return Some(Detection {
            reason: AnomalyReason::InvalidCardNumber,
            score: INVALID_CARD_SCORE,
            details: format!("Luhn check failed: {}", ev.post_data),
        });
    }
    None
}

// ---------------------------------------------------------------------------
// Pattern helpers
// ---------------------------------------------------------------------------

/// Case-insensitive SQL injection markers: quote characters, comment
/// terminators, `UNION SELECT`, and `OR`/`AND` number tautologies.
fn has_sql_pattern(input: &str) -> bool {
    let lower = input.to_lowercase();
    lower.contains('\'')
        || lower.contains('"')
        || lower.contains("--")
        || lower.contains("union select")
        || has_tautology(&lower, "or")
        || has_tautology(&lower, "and")
}

/// Matches `<kw> <n>=<n>` with the keyword on a word boundary,
/// e.g. `or 1=1` but not `color 1=1`.
fn has_tautology(lower: &str, kw: &str) -> bool {
    let bytes = lower.as_bytes();
    let mut start = 0;
    while let Some(pos) = lower[start..].find(kw) {
        let idx = start + pos;
        let boundary_before = idx == 0 || !bytes[idx - 1].is_ascii_alphanumeric();
        if boundary_before && tautology_tail(&lower[idx + kw.len()..]) {
            return true;
        }
        start = idx + kw.len();
    }
    false
}

/// Consumes ` <digits>=<digits>` after a tautology keyword.
fn tautology_tail(rest: &str) -> bool {
    let trimmed = rest.trim_start();
    if trimmed.len() == rest.len() {
        // No whitespace after the keyword.
        return false;
    }

    let mut chars = trimmed.chars().peekable();
    let mut saw_digit = false;
    while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
        saw_digit = true;
        chars.next();
    }
    saw_digit && chars.next() == Some('=') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

/// Case-insensitive XSS markers: script tags, broken-image `onerror`
/// handlers, and `onload=` attributes.
fn has_xss_pattern(input: &str) -> bool {
    let lower = input.to_lowercase();
    lower.contains("<script>")
        || (lower.contains("<img") && lower.contains("onerror"))
        || lower.contains("onload=")
}

/// Standard Luhn checksum: digits read right to left, every second digit
/// doubled with the doubled value's digits summed, valid when the total
/// is divisible by ten. Any non-digit input is invalid.
pub fn luhn_valid(number: &str) -> bool {
    let number = number.trim();
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let mut sum = 0u32;
    for (i, c) in number.chars().rev().enumerate() {
        let mut d = c.to_digit(10).unwrap_or(0);
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::RawEvent;

    fn event(url: &str, status: u16, ua: &str, post: &str) -> NormalizedEvent {
        let raw = RawEvent {
            ip: Some("198.51.100.7".to_string()),
            country: None,
            url: Some(url.to_string()),
            status_code: Some(status),
            user_agent: Some(ua.to_string()),
            post_data: Some(post.to_string()),
        };
        NormalizedEvent::from_raw(&raw, false, Some(5_000))
    }

    fn cfg() -> ScoringConfig {
        ScoringConfig::default()
    }

    #[test]
    fn test_robotic_activity_fires_below_threshold() {
        let mut ev = event("/", 200, "Mozilla/5.0", "");
        ev.time_delta_ms = Some(80);
        let hits = evaluate(&ev, &cfg());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reason, AnomalyReason::RoboticActivity);
        assert_eq!(hits[0].score, 25);
        assert!(hits[0].details.contains("80ms"));
    }

    #[test]
    fn test_robotic_activity_suppressed_on_first_sight() {
        let mut ev = event("/", 200, "Mozilla/5.0", "");
        ev.is_first_seen = true;
        ev.time_delta_ms = None;
        assert!(evaluate(&ev, &cfg()).is_empty());
    }

    #[test]
    fn test_scanner_user_agent() {
        let ev = event("/", 200, "sqlmap/1.6.6#stable", "");
        let hits = evaluate(&ev, &cfg());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reason, AnomalyReason::ScannerUserAgent);
        assert_eq!(hits[0].score, 40);
    }

    #[test]
    fn test_scanner_user_agent_case_insensitive() {
        let ev = event("/", 200, "Mozilla/5.0 NIKTO probe", "");
        let hits = evaluate(&ev, &cfg());
        assert_eq!(hits[0].reason, AnomalyReason::ScannerUserAgent);
    }

    #[test]
    fn test_path_scanning_severities() {
        for (url, score) in [
            ("/.git/config", 50),
            ("/.env", 50),
            ("/../../etc/passwd", 50),
            ("/app/config.ini", 40),
            ("/wp-admin/setup", 30),
            ("/auth/session", 25),
            ("/index.php", 20),
        ] {
            let hits = evaluate(&event(url, 200, "Mozilla/5.0", ""), &cfg());
            assert_eq!(hits.len(), 1, "url {}", url);
            assert_eq!(hits[0].reason, AnomalyReason::PathScanning);
            assert_eq!(hits[0].score, score, "url {}", url);
        }
    }

    #[test]
    fn test_path_scanning_short_circuits_on_first_match() {
        // /admin.php matches both the /admin pattern (30) and the .php
        // suffix (20); only the earlier, higher-priority pattern fires.
        let hits = evaluate(&event("/admin.php", 200, "Mozilla/5.0", ""), &cfg());
        let path_hits: Vec<_> = hits
            .iter()
            .filter(|d| d.reason == AnomalyReason::PathScanning)
            .collect();
        assert_eq!(path_hits.len(), 1);
        assert_eq!(path_hits[0].score, 30);
    }

    #[test]
    fn test_sql_injection_variants() {
        for url in [
            "/products?id=1' OR 1=1 --",
            "/search?q=1 UNION SELECT password FROM users",
            "/item?id=2 AND 7=7",
            "/q?name=\"x\"",
        ] {
            let hits = evaluate(&event(url, 200, "Mozilla/5.0", ""), &cfg());
            assert!(
                hits.iter().any(|d| d.reason == AnomalyReason::SqlInjection && d.score == 80),
                "url {}",
                url
            );
        }
    }

    #[test]
    fn test_sql_tautology_needs_word_boundary() {
        let hits = evaluate(&event("/colors?filter=color 1=1", 200, "Mozilla/5.0", ""), &cfg());
        assert!(!hits.iter().any(|d| d.reason == AnomalyReason::SqlInjection));
    }

    #[test]
    fn test_sql_injection_url_takes_precedence_over_post() {
        let ev = event("/a?id=1' --", 200, "Mozilla/5.0", "id=2' --");
        let hits = evaluate(&ev, &cfg());
        let sql: Vec<_> = hits
            .iter()
            .filter(|d| d.reason == AnomalyReason::SqlInjection)
            .collect();
        assert_eq!(sql.len(), 1);
        assert_eq!(sql[0].details, "/a?id=1' --");
    }

    #[test]
    fn test_sql_injection_in_post_only() {
        let ev = event("/comment", 200, "Mozilla/5.0", "text=x UNION SELECT 1");
        let hits = evaluate(&ev, &cfg());
        let sql: Vec<_> = hits
            .iter()
            .filter(|d| d.reason == AnomalyReason::SqlInjection)
            .collect();
        assert_eq!(sql.len(), 1);
        assert_eq!(sql[0].details, "text=x UNION SELECT 1");
    }

    #[test]
    fn test_xss_variants() {
        for payload in [
            "/q?s=<script>alert(1)</script>",
            "/q?s=<IMG src=x onerror=alert(1)>",
            "/q?s=<body onload=alert(1)>",
        ] {
            let hits = evaluate(&event(payload, 200, "Mozilla/5.0", ""), &cfg());
            assert!(
                hits.iter().any(|d| d.reason == AnomalyReason::XssAttempt && d.score == 60),
                "payload {}",
                payload
            );
        }
    }

    #[test]
    fn test_login_bruteforce_requires_401() {
        let hits = evaluate(&event("/login", 401, "Mozilla/5.0", ""), &cfg());
        assert!(hits.iter().any(|d| d.reason == AnomalyReason::LoginBruteForce && d.score == 15));

        let hits = evaluate(&event("/login", 200, "Mozilla/5.0", ""), &cfg());
        assert!(!hits.iter().any(|d| d.reason == AnomalyReason::LoginBruteForce));
    }

    #[test]
    fn test_luhn_vectors() {
        assert!(luhn_valid("49927398716"));
        assert!(!luhn_valid("4111111111111112"));
        assert!(luhn_valid("4111111111111111"));
        assert!(!luhn_valid(""));
        assert!(!luhn_valid("4242-4242-4242-4242"));
        assert!(!luhn_valid("not a number"));
    }

    #[test]
    fn test_invalid_card_fires_on_payment_url_only() {
        let hits = evaluate(&event("/api/payment", 200, "Mozilla/5.0", "4111111111111112"), &cfg());
        assert!(hits.iter().any(|d| d.reason == AnomalyReason::InvalidCardNumber && d.score == 30));

        // Valid card number: no anomaly.
        let hits = evaluate(&event("/api/payment", 200, "Mozilla/5.0", "49927398716"), &cfg());
        assert!(!hits.iter().any(|d| d.reason == AnomalyReason::InvalidCardNumber));

        // Same body off a payment URL: not this rule's business.
        let hits = evaluate(&event("/api/profile", 200, "Mozilla/5.0", "4111111111111112"), &cfg());
        assert!(!hits.iter().any(|d| d.reason == AnomalyReason::InvalidCardNumber));

        // Empty POST body never fires.
        let hits = evaluate(&event("/api/payment", 200, "Mozilla/5.0", ""), &cfg());
        assert!(!hits.iter().any(|d| d.reason == AnomalyReason::InvalidCardNumber));
    }

    #[test]
    fn test_multi_rule_accumulation() {
        let mut ev = event("/admin.php' OR 1=1 --", 200, "sqlmap/1.6.6", "");
        ev.time_delta_ms = Some(5_000);
        let hits = evaluate(&ev, &cfg());
        assert_eq!(hits.len(), 3);
        assert_eq!(hits.iter().map(|d| d.score).sum::<i64>(), 150);
        assert!(hits.iter().any(|d| d.reason == AnomalyReason::PathScanning && d.score == 30));
        assert!(hits.iter().any(|d| d.reason == AnomalyReason::ScannerUserAgent && d.score == 40));
        assert!(hits.iter().any(|d| d.reason == AnomalyReason::SqlInjection && d.score == 80));
    }

    #[test]
    fn test_benign_event_is_clean() {
        let ev = event("/products/42", 200, "Mozilla/5.0 (X11; Linux x86_64)", "");
        assert!(evaluate(&ev, &cfg()).is_empty());
    }
}
