//! Control plane for an externally supervised proxy engine.
//!
//! Supervises the engine process, reconciles a persisted upstream-proxy list
//! and selection policy into the engine's configuration API, and streams
//! operational logs to observers.

// Core subsystems
pub mod events;
pub mod reconcile;
pub mod store;
pub mod supervisor;

// Composition
pub mod control;
pub mod status;

// Surfaces
pub mod admin;
pub mod http;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::WardenConfig;
pub use control::ControlPlane;
pub use http::HttpServer;
pub use lifecycle::{Shutdown, Warden};
