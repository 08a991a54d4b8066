//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Build subsystems → Background tasks → (autostart engine) → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Stop engine (SIGTERM, then SIGKILL) → Drain tasks → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{StartupError, Warden};
