//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the listen address parses as a socket address
//! - Validate the timeout is non-zero
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid listen address {addr:?}: {reason}")]
    InvalidAddr { addr: String, reason: String },

    #[error("timeout must be greater than zero")]
    ZeroTimeout,
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = config.addr.parse::<SocketAddr>() {
        errors.push(ValidationError::InvalidAddr {
            addr: config.addr.clone(),
            reason: e.to_string(),
        });
    }

    if config.timeout.is_zero() {
        errors.push(ValidationError::ZeroTimeout);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
