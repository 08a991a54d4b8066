//! Metrics collection and exposition.
//!
//! # Metrics
//! - `warden_engine_starts_total` (counter)
//! - `warden_engine_crashes_total` (counter): unsolicited exits
//! - `warden_engine_kill_escalations_total` (counter): SIGKILL after grace period
//! - `warden_reconcile_total` (counter): by `outcome` (applied, noop, failed)
//! - `warden_reconcile_duration_seconds` (histogram)
//! - `warden_log_entries_total` (counter): by `level`
//! - `warden_log_observers` (gauge): connected stream observers
//! - `warden_log_sink_dropped_total` (counter): entries the file sink could not queue
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_engine_start() {
    ::metrics::counter!("warden_engine_starts_total").increment(1);
}

pub fn record_engine_crash() {
    ::metrics::counter!("warden_engine_crashes_total").increment(1);
}

pub fn record_kill_escalation() {
    ::metrics::counter!("warden_engine_kill_escalations_total").increment(1);
}

pub fn record_reconcile(outcome: &'static str, elapsed: Duration) {
    ::metrics::counter!("warden_reconcile_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("warden_reconcile_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_log_entry(level: &'static str) {
    ::metrics::counter!("warden_log_entries_total", "level" => level).increment(1);
}

pub fn set_observers(count: usize) {
    ::metrics::gauge!("warden_log_observers").set(count as f64);
}

pub fn record_sink_drop() {
    ::metrics::counter!("warden_log_sink_dropped_total").increment(1);
}
