//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, middleware)
//!     → request.rs (request ID, request span)
//!     → /api/*   → admin handlers → ControlPlane
//!     → /ws/logs → websocket.rs   → EventHub subscription
//! ```

pub mod request;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
