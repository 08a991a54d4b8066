//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! warden.toml (optional)
//!     → loader.rs (parse & deserialize, env overrides)
//!     → validation.rs (semantic checks)
//!     → WardenConfig (validated, immutable)
//!     → handed to lifecycle::startup, which builds every subsystem
//! ```
//!
//! This is the control plane's own configuration. The operator-editable
//! desired state (proxy list, policy) lives in [`crate::store`].

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::WardenConfig;
pub use schema::{
    AdminConfig, EngineConfig, EventsConfig, ListenerConfig, ObservabilityConfig, StoreConfig,
};
