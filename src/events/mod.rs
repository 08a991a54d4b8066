//! Event hub subsystem.
//!
//! # Data Flow
//! ```text
//! engine stdout/stderr ──▶ supervisor ──EngineEvents──▶ classify.rs ──┐
//! supervisor notices ───────────────────────────────────────────────┤
//! reconciler / control plane / poller ──────────────────────────────┤
//!                                                                    ▼
//!                                                          hub.rs append()
//!                                                     ┌──────────┼──────────┐
//!                                                     ▼          ▼          ▼
//!                                                  ring     observers   sink.rs
//!                                                (bounded)  (fan-out)  (file, write-behind)
//! ```

pub mod classify;
pub mod entry;
pub mod hub;
pub mod sink;

pub use entry::{HubMessage, LogEntry, LogLevel};
pub use hub::{EventHub, Subscription};
pub use sink::LogSink;

use crate::supervisor::{EngineEvents, Notice, OutputStream};

impl EngineEvents for EventHub {
    fn output_line(&self, _stream: OutputStream, line: String) {
        if let Some(entry) = classify::classify_line(&line) {
            self.append(entry);
        }
    }

    fn notice(&self, level: Notice, message: String) {
        let level = match level {
            Notice::Info => LogLevel::Info,
            Notice::Warn => LogLevel::Warn,
            Notice::Error => LogLevel::Error,
        };
        self.append(LogEntry::new(level, message));
    }
}
