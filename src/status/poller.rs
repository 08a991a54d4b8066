//! Periodic engine service-event polling.
//!
//! # Responsibilities
//! - Periodically read the engine's running configuration
//! - Forward service status events not seen before to the event hub

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time;

use crate::events::{EventHub, LogEntry, LogLevel};
use crate::reconcile::{EngineClient, SERVICE_NAME};

#[derive(Debug, Deserialize)]
struct ServiceEvent {
    #[serde(default)]
    msg: String,
    /// Unix seconds.
    #[serde(default)]
    time: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceStatus {
    #[serde(default)]
    events: Vec<ServiceEvent>,
}

#[derive(Debug, Deserialize)]
struct ServiceView {
    name: String,
    #[serde(default)]
    status: Option<ServiceStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigView {
    #[serde(default)]
    services: Option<Vec<ServiceView>>,
}

pub struct EngineEventPoller {
    client: Arc<EngineClient>,
    hub: Arc<EventHub>,
    interval: Duration,
    /// Timestamp of the newest forwarded event.
    last_time: Option<i64>,
    /// Messages already forwarded at `last_time`.
    seen_at_last: HashSet<String>,
}

impl EngineEventPoller {
    pub fn new(client: Arc<EngineClient>, hub: Arc<EventHub>, interval: Duration) -> Self {
        Self {
            client,
            hub,
            interval,
            last_time: None,
            seen_at_last: HashSet::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if self.interval.is_zero() {
            tracing::info!("Engine event polling disabled");
            return;
        }

        tracing::info!(interval_secs = self.interval.as_secs(), "Engine event poller starting");
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Engine event poller received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn poll_once(&mut self) {
        match self.client.get_config().await {
            Ok(config) => {
                for entry in self.fresh_events(config) {
                    self.hub.append(entry);
                }
            }
            // Engine down or still starting; status reports that separately.
            Err(e) => tracing::trace!(error = %e, "Engine config poll skipped"),
        }
    }

    /// Events of our service newer than the last forwarded one, oldest first.
    fn fresh_events(&mut self, config: serde_json::Value) -> Vec<LogEntry> {
        let view: ConfigView = serde_json::from_value(config).unwrap_or_default();
        let events = view
            .services
            .unwrap_or_default()
            .into_iter()
            .find(|s| s.name == SERVICE_NAME)
            .and_then(|s| s.status)
            .map(|s| s.events)
            .unwrap_or_default();

        let mut fresh = Vec::new();
        for event in events {
            if event.msg.is_empty() {
                continue;
            }
            match self.last_time {
                Some(last) if event.time < last => continue,
                Some(last) if event.time == last => {
                    if !self.seen_at_last.insert(event.msg.clone()) {
                        continue;
                    }
                }
                _ => {
                    self.last_time = Some(event.time);
                    self.seen_at_last.clear();
                    self.seen_at_last.insert(event.msg.clone());
                }
            }
            fresh.push(LogEntry::at(event_time(event.time), LogLevel::Info, event.msg));
        }
        fresh
    }
}

fn event_time(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn poller() -> EngineEventPoller {
        let client = Arc::new(
            EngineClient::new("http://127.0.0.1:9", Duration::from_millis(200), Duration::from_millis(200)).unwrap(),
        );
        EngineEventPoller::new(client, Arc::new(EventHub::new(10)), Duration::from_secs(5))
    }

    fn config(events: serde_json::Value) -> serde_json::Value {
        json!({
            "services": [
                {"name": "other", "status": {"events": [{"msg": "ignored", "time": 1}]}},
                {"name": "proxy-service", "status": {"events": events}}
            ]
        })
    }

    #[test]
    fn test_forwards_only_new_events() {
        let mut p = poller();
        let first = p.fresh_events(config(json!([
            {"msg": "service listening on :8080", "time": 1_700_000_000},
            {"msg": "chain updated", "time": 1_700_000_005}
        ])));
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].level, LogLevel::Info);
        assert_eq!(first[0].timestamp.timestamp(), 1_700_000_000);

        let second = p.fresh_events(config(json!([
            {"msg": "chain updated", "time": 1_700_000_005},
            {"msg": "listener restarted", "time": 1_700_000_010}
        ])));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message, "listener restarted");
    }

    #[test]
    fn test_same_second_events_are_all_forwarded() {
        let mut p = poller();
        let first = p.fresh_events(config(json!([
            {"msg": "service listening", "time": 1_700_000_000},
            {"msg": "chain updated", "time": 1_700_000_000}
        ])));
        let messages: Vec<&str> = first.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["service listening", "chain updated"]);

        let second = p.fresh_events(config(json!([
            {"msg": "service listening", "time": 1_700_000_000},
            {"msg": "chain updated", "time": 1_700_000_000},
            {"msg": "auth reloaded", "time": 1_700_000_000}
        ])));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message, "auth reloaded");
    }

    #[test]
    fn test_tolerates_missing_sections() {
        let mut p = poller();
        assert!(p.fresh_events(json!({})).is_empty());
        assert!(p.fresh_events(json!({"services": [{"name": "proxy-service"}]})).is_empty());
        assert!(p.fresh_events(json!("garbage")).is_empty());
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(poller().run(rx));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(3), handle).await.unwrap().unwrap();
    }
}
