//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, routes, lifecycle)
//!     → /            entry document
//!     → /public/*    static files, prefix stripped
//!     → /ws          websocket.rs (upgrade, hand off to subscriber)
//! ```

pub mod server;
pub mod websocket;

pub use server::{Server, ServerError, SHUTDOWN_TIMEOUT};
