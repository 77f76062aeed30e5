//! The subscriber seam.
//!
//! # Responsibilities
//! - Define the capability the server hands every upgraded connection to
//! - Define the errors a subscription may end with
//! - Classify a finished subscription for logging
//!
//! # Design Decisions
//! - The server owns the connection; a subscriber only borrows it, so the
//!   server can always close it afterwards
//! - Cancellation arrives through a `CancellationToken` that is a descendant
//!   of the token passed to `Server::start`

pub mod echo;
pub mod outcome;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::net::Connection;

pub use echo::EchoSubscriber;
pub use outcome::Outcome;

/// Boxed error for subscriber failures that don't fit another variant.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Business logic for the lifetime of one websocket connection.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Runs until the connection ends or `cancel` fires.
    ///
    /// Implementations must react to `cancel` promptly and return
    /// [`SubscribeError::Cancelled`] when they stop because of it.
    async fn subscribe(
        &self,
        cancel: CancellationToken,
        conn: &mut Connection,
    ) -> Result<(), SubscribeError>;
}

/// Ways a subscription can end other than a clean return.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("context canceled")]
    Cancelled,

    #[error("connection closed: status = {code} reason = {reason:?}")]
    Closed { code: u16, reason: String },

    #[error("connection already closed")]
    AlreadyClosed,

    #[error("websocket transport error: {0}")]
    Transport(#[from] axum::Error),

    #[error(transparent)]
    Other(BoxError),
}

impl SubscribeError {
    /// Wrap an arbitrary error as a subscriber failure.
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }

    /// Close status carried by this error, if it came from a close handshake.
    pub fn close_status(&self) -> Option<u16> {
        match self {
            Self::Closed { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_status_only_for_close_errors() {
        let closed = SubscribeError::Closed {
            code: 1001,
            reason: "bye".into(),
        };
        assert_eq!(closed.close_status(), Some(1001));
        assert_eq!(SubscribeError::Cancelled.close_status(), None);
        assert_eq!(SubscribeError::other("boom").close_status(), None);
    }

    #[test]
    fn other_keeps_source_message() {
        let err = SubscribeError::other("database unreachable");
        assert_eq!(err.to_string(), "database unreachable");
    }
}
