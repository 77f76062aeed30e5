//! Static file server with a single websocket upgrade route.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ Server::start ──▶ axum router ──┬─▶ /          entry document
//!                 (lifecycle)                    ├─▶ /public/*  static files
//!                                                └─▶ /ws        upgrade handler
//!                                                                   │
//!                                                                   ▼
//!                                                          Subscriber::subscribe
//!                                                          (one task per connection)
//! ```
//!
//! `Server::start` runs until its cancellation token fires or serving fails,
//! then drains in-flight connections for up to [`http::SHUTDOWN_TIMEOUT`].

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod subscriber;

pub use config::ServerConfig;
pub use http::{Server, ServerError};
pub use lifecycle::Shutdown;
pub use net::Connection;
pub use subscriber::{Outcome, SubscribeError, Subscriber};
