//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted socket
//!     → timeout.rs (stalled writes fail after the configured timeout)
//!     → HTTP upgrade on /ws
//! Upgraded websocket
//!     → connection.rs (ownership, close handshake, state machine)
//!     → lent to the subscriber
//!
//! Connection States:
//!     Upgraded → Subscribing → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Each connection tracked for graceful shutdown
//! - A connection is closed exactly once, whoever starts the handshake

pub mod connection;
pub mod timeout;

pub use connection::{
    Connection, ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker,
};
pub use timeout::WriteTimeout;
