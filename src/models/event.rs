use serde::{Deserialize, Serialize};

/// Inbound access-log event as received on the ingestion endpoint.
///
/// Only `ip` is semantically required; an event without it is dropped
/// without side effects. A `status_code` that is present but not an
/// integer fails deserialization, which the ingestion layer maps to a
/// client error -- optional fields default, malformed ones do not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    pub ip: Option<String>,
    pub country: Option<String>,
    pub url: Option<String>,
    pub status_code: Option<u16>,
    pub user_agent: Option<String>,
    pub post_data: Option<String>,
}

/// Event shape the rule library evaluates: raw fields resolved to their
/// defaults plus the per-source timing context computed by the engine.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub ip: String,
    pub country: Option<String>,
    pub url: String,
    pub status_code: u16,
    pub user_agent: String,
    pub post_data: String,
    /// True when this event created the source's ledger entry.
    pub is_first_seen: bool,
    /// Milliseconds since the source's previous event; `None` on first sight.
    pub time_delta_ms: Option<i64>,
}

impl NormalizedEvent {
    pub fn from_raw(raw: &RawEvent, is_first_seen: bool, time_delta_ms: Option<i64>) -> Self {
        Self {
            ip: raw.ip.clone().unwrap_or_default(),
            country: raw.country.clone(),
            url: raw.url.clone().unwrap_or_default(),
            status_code: raw.status_code.unwrap_or(200),
            user_agent: raw.user_agent.clone().unwrap_or_default(),
            post_data: raw.post_data.clone().unwrap_or_default(),
            is_first_seen,
            time_delta_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let raw: RawEvent = serde_json::from_str(r#"{"ip": "1.2.3.4"}"#).unwrap();
        let ev = NormalizedEvent::from_raw(&raw, true, None);
        assert_eq!(ev.status_code, 200);
        assert_eq!(ev.url, "");
        assert_eq!(ev.user_agent, "");
        assert_eq!(ev.post_data, "");
    }

    #[test]
    fn test_non_integer_status_code_rejected() {
        let res: Result<RawEvent, _> = serde_json::from_str(r#"{"ip": "1.2.3.4", "status_code": "teapot"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_missing_ip_still_deserializes() {
        let raw: RawEvent = serde_json::from_str(r#"{"url": "/index.html"}"#).unwrap();
        assert!(raw.ip.is_none());
    }
}
