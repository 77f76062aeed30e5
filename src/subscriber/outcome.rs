//! Classification of finished subscriptions.

use axum::extract::ws::close_code;
use tracing::Level;

use super::SubscribeError;

/// How a subscription ended. Only used to pick a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Subscriber returned `Ok(())`.
    Completed,
    /// Close handshake with status 1000.
    Normal,
    /// Close handshake with status 1001.
    GoingAway,
    /// Shutdown or client disconnect observed through the cancellation token.
    Cancelled,
    /// Anything else.
    Failed(String),
}

impl Outcome {
    pub fn classify(result: &Result<(), SubscribeError>) -> Self {
        let err = match result {
            Ok(()) => return Self::Completed,
            Err(err) => err,
        };

        if err.is_cancelled() {
            return Self::Cancelled;
        }

        match err.close_status() {
            Some(close_code::NORMAL) => Self::Normal,
            Some(close_code::AWAY) => Self::GoingAway,
            _ => Self::Failed(err.to_string()),
        }
    }

    /// Level the outcome is logged at.
    pub fn level(&self) -> Level {
        match self {
            Self::Completed => Level::DEBUG,
            Self::Normal | Self::GoingAway | Self::Cancelled => Level::INFO,
            Self::Failed(_) => Level::ERROR,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Normal => write!(f, "normal closure"),
            Self::GoingAway => write!(f, "going away"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed(detail) => write!(f, "failed: {}", detail),
        }
    }
}
