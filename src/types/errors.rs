//! Bus error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. The enum is
//! `Clone` because a single failure cause is fanned out to every observer of a
//! failed request.

use std::sync::Arc;
use thiserror::Error;

/// Bus result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the bus kernel.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Protocol or programmer error: illegal state change, double completion,
    /// re-attaching an attached node.
    #[error("state violation: {0}")]
    StateViolation(String),

    /// A hub member name is already claimed.
    #[error("name collision: {0}")]
    NameCollision(String),

    /// Unknown path, route, service or correlation id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input (paths, configuration, frames from callers).
    #[error("validation error: {0}")]
    Validation(String),

    /// An asynchronous operation failed (hook, worker, handler).
    #[error("failed: {0}")]
    Failed(String),

    /// Failure cause transmitted by a remote peer in a `KO` response.
    #[error("remote failure: {0}")]
    Remote(String),

    /// The operation was cancelled.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A deadline elapsed before completion.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The waiting side was interrupted.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// An outbound queue could not drain within the configured wait.
    #[error("stale connection: {0}")]
    StaleConnection(String),

    /// Malformed frame or handshake on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O errors (shared so the enum stays `Clone`).
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short code carried in `KO` responses and structured logs.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Error::StateViolation(_) => "STATE_VIOLATION",
            Error::NameCollision(_) => "NAME_COLLISION",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Validation(_) => "INVALID_ARGUMENT",
            Error::Failed(_) => "FAILED",
            Error::Remote(_) => "REMOTE",
            Error::Cancelled(_) => "CANCELLED",
            Error::Timeout(_) => "DEADLINE_EXCEEDED",
            Error::Interrupted(_) => "INTERRUPTED",
            Error::StaleConnection(_) => "STALE_CONNECTION",
            Error::Protocol(_) => "PROTOCOL",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Io(_) => "IO",
            Error::Internal(_) => "INTERNAL",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted(_))
    }
}

// Convenience constructors
impl Error {
    pub fn state_violation(msg: impl Into<String>) -> Self {
        Self::StateViolation(msg.into())
    }

    pub fn name_collision(msg: impl Into<String>) -> Self {
        Self::NameCollision(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn interrupted(msg: impl Into<String>) -> Self {
        Self::Interrupted(msg.into())
    }

    pub fn stale(msg: impl Into<String>) -> Self {
        Self::StaleConnection(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_distinguish_timeout_and_interrupt() {
        assert_eq!(Error::timeout("x").wire_code(), "DEADLINE_EXCEEDED");
        assert_eq!(Error::interrupted("x").wire_code(), "INTERRUPTED");
        assert!(Error::timeout("x").is_timeout());
        assert!(!Error::timeout("x").is_interrupted());
    }

    #[test]
    fn test_io_error_is_cloneable() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        let copy = err.clone();
        assert_eq!(copy.wire_code(), "IO");
        assert!(copy.to_string().contains("pipe"));
    }
}
