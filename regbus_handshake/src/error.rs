//! Handshake error taxonomy.
//!
//! Every handshake failure is reported as `{kind, message}`. Bus-level
//! failures are folded into the matching kind.

use regbus_bus::BusError;
use std::fmt;
use thiserror::Error;

/// Category of a handshake failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Module not Ready or in Alarm when a command was to be issued.
    NotReady,
    /// Transport failure talking to the bus.
    Connection,
    /// Completion not observed within the deadline.
    Timeout,
    /// Module raised Alarm while executing.
    Failed,
    /// Completion belongs to another command, or the command id was a duplicate.
    Correlation,
    /// Request or parameters rejected.
    Validation,
    /// Unexpected bus or module state.
    System,
    /// Cancellation token fired while waiting.
    Cancelled,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotReady => "NOT_READY",
            Self::Connection => "CONNECTION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Failed => "FAILED",
            Self::Correlation => "CORRELATION_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::System => "SYSTEM_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured handshake failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct HandshakeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HandshakeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotReady, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Failed, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    /// True when retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::NotReady | ErrorKind::Connection | ErrorKind::Timeout
        )
    }
}

impl From<BusError> for HandshakeError {
    fn from(err: BusError) -> Self {
        let kind = if err.is_connection() {
            ErrorKind::Connection
        } else if err.is_validation() {
            ErrorKind::Validation
        } else {
            ErrorKind::System
        };
        Self::new(kind, err.to_string())
    }
}

/// Result type for handshake operations.
pub type HandshakeResult<T> = Result<T, HandshakeError>;
