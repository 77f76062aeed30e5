//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured fields: connection_id, peer, outcome)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//! ```
//!
//! # Design Decisions
//! - One dispatcher for the whole process, captured by the server at start
//!   and attached to every task it spawns

pub mod logging;

pub use logging::{init_logging, LogFormat};
