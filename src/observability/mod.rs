//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events to stdout)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Operator terminal / log collector
//!     → Metrics endpoint (Prometheus scrape, when enabled)
//! ```
//!
//! Operator-facing history (the event hub) is separate: it is part of the
//! product surface, not the control plane's own diagnostics.

pub mod logging;
pub mod metrics;
