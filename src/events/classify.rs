//! Classification of raw engine output lines.
//!
//! The engine writes one JSON record per line. Only a small allow-list of
//! record kinds reaches observers; routine traffic is dropped. Lines that are
//! not JSON are forwarded only when they look like an error.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::events::entry::{LogEntry, LogLevel};

/// Markers that let an unstructured line through.
const ERROR_MARKERS: &[&str] = &["error", "fatal", "panic"];

/// Engine record kinds that are surfaced to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ConnectionEstablished,
    ConnectionClosed,
    ServiceStatus,
}

#[derive(Debug, Deserialize)]
struct EngineRecord {
    #[serde(default)]
    level: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    time: Option<String>,
}

impl EngineRecord {
    fn event_kind(&self) -> Option<EventKind> {
        if self.msg.contains(" >-< ") {
            Some(EventKind::ConnectionClosed)
        } else if self.msg.contains(" <> ") {
            Some(EventKind::ConnectionEstablished)
        } else if self.kind == "service" {
            Some(EventKind::ServiceStatus)
        } else {
            None
        }
    }

    fn level(&self) -> LogLevel {
        match self.level.to_ascii_lowercase().as_str() {
            "error" | "fatal" | "panic" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            _ => LogLevel::Engine,
        }
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }
}

/// Turn a raw output line into an observer entry, or drop it.
pub fn classify_line(line: &str) -> Option<LogEntry> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<EngineRecord>(trimmed) {
        Ok(record) => {
            let kind = record.event_kind()?;
            let message = match (kind, &record.service) {
                (EventKind::ServiceStatus, Some(service)) => format!("[{}] {}", service, record.msg),
                _ => record.msg.clone(),
            };
            Some(LogEntry::at(record.timestamp(), record.level(), message))
        }
        Err(_) => {
            let lower = trimmed.to_ascii_lowercase();
            if ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
                Some(LogEntry::error(trimmed))
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_records_pass() {
        let opened = classify_line(
            r#"{"level":"info","kind":"handler","msg":"10.0.0.5:51000 <> example.com:443","service":"proxy-service"}"#,
        )
        .unwrap();
        assert_eq!(opened.level, LogLevel::Engine);
        assert_eq!(opened.message, "10.0.0.5:51000 <> example.com:443");

        let closed = classify_line(
            r#"{"level":"info","kind":"handler","msg":"10.0.0.5:51000 >-< example.com:443","duration":1.2}"#,
        );
        assert!(closed.is_some());
    }

    #[test]
    fn test_service_status_is_tagged_with_service() {
        let entry = classify_line(
            r#"{"level":"info","kind":"service","service":"proxy-service","msg":"listening on [::]:8080/tcp","time":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(entry.message, "[proxy-service] listening on [::]:8080/tcp");
        assert_eq!(entry.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_routine_records_dropped() {
        assert!(classify_line(r#"{"level":"debug","kind":"dialer","msg":"dial tcp 10.0.0.1:1080"}"#).is_none());
        assert!(classify_line(r#"{"level":"error","kind":"api","msg":"bad request"}"#).is_none());
        assert!(classify_line("   ").is_none());
    }

    #[test]
    fn test_plain_text_only_with_error_marker() {
        assert!(classify_line("starting up, nothing to see").is_none());

        let entry = classify_line("FATAL: listen tcp :8080: bind: address already in use").unwrap();
        assert_eq!(entry.level, LogLevel::Error);
    }
}
