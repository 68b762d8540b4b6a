//! Error types for register bus operations

use crate::wire::ExceptionCode;
use thiserror::Error;

/// Errors that can occur during register bus operations
#[derive(Error, Debug)]
pub enum BusError {
    /// Address range outside the register array
    #[error("Address range {address}..{end} outside register array of {size}", end = .address + .count)]
    OutOfRange {
        /// First requested address
        address: usize,
        /// Number of registers requested
        count: usize,
        /// Register array size
        size: usize,
    },

    /// Value does not fit in an unsigned 16-bit register
    #[error("Invalid value {value} for register {address} (must be 0-65535)")]
    InvalidValue {
        /// Target address
        address: u16,
        /// Rejected value
        value: i64,
    },

    /// Request quantity outside protocol limits
    #[error("Invalid quantity {count} (must be 1-{max})")]
    InvalidQuantity {
        /// Requested quantity
        count: usize,
        /// Maximum for this request
        max: usize,
    },

    /// Peer answered with a Modbus exception
    #[error("Peer returned exception {code:?} for function {function:#04x}")]
    Exception {
        /// Function code of the failed request
        function: u8,
        /// Exception code reported by the peer
        code: ExceptionCode,
    },

    /// Malformed or unexpected frame
    #[error("Protocol error: {reason}")]
    Protocol {
        /// What was wrong with the frame
        reason: String,
    },

    /// Connection failure, closed socket or request timeout
    #[error("Connection error: {source}")]
    Connection {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        /// Source JSON error
        #[from]
        source: serde_json::Error,
    },
}

impl BusError {
    /// Build a protocol error from any displayable reason
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// True for errors caused by the transport rather than the request
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// True for address/value/quantity rejections
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::OutOfRange { .. } | Self::InvalidValue { .. } | Self::InvalidQuantity { .. }
        )
    }

    /// Exception code reported to a network peer for this error
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            Self::OutOfRange { .. } => ExceptionCode::IllegalDataAddress,
            Self::InvalidValue { .. } | Self::InvalidQuantity { .. } => {
                ExceptionCode::IllegalDataValue
            }
            Self::Exception { code, .. } => *code,
            Self::Protocol { .. } | Self::Connection { .. } | Self::Json { .. } => {
                ExceptionCode::ServerDeviceFailure
            }
        }
    }
}

/// Result type for register bus operations
pub type BusResult<T> = Result<T, BusError>;
