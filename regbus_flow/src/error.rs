//! Flow error types.

use regbus_bus::BusError;
use regbus_handshake::HandshakeError;
use thiserror::Error;

/// Failure reported by a motion controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MotionError {
    #[error("motion controller not connected")]
    NotConnected,

    /// Controller refused the request (limits, unreachable pose).
    #[error("motion rejected: {0}")]
    Rejected(String),

    #[error("motion did not settle in time")]
    Timeout,

    #[error("motion failed: {0}")]
    Failed(String),
}

/// Errors raised while loading or executing a flow.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Motion(#[from] MotionError),

    #[error("device '{device}': {source}")]
    Device {
        device: String,
        #[source]
        source: HandshakeError,
    },

    #[error("unknown point '{0}'")]
    UnknownPoint(String),

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    /// A step targets the last detection but none was produced yet,
    /// or it carries no world coordinates.
    #[error("no detection with world coordinates available")]
    NoDetection,

    #[error("device '{device}' cannot perform {action}")]
    UnsupportedAction { device: String, action: &'static str },

    #[error("flow {0} is not registered")]
    UnknownFlow(u16),

    /// NOP and the reset opcode cannot start a flow.
    #[error("flow id {0} is reserved")]
    ReservedFlowId(u16),

    #[error("flow cancelled")]
    Cancelled,

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    pub fn device(device: impl Into<String>, source: HandshakeError) -> Self {
        Self::Device {
            device: device.into(),
            source,
        }
    }
}

pub type FlowResult<T> = Result<T, FlowError>;
