//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → token cancelled → Server::start stops accepting
//!             → in-flight connections drained (bounded) → return
//! ```
//!
//! # Design Decisions
//! - One cancellation token is the only external shutdown source
//! - Shutdown has timeout: remaining connections cancelled after deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_shutdown_signal;
