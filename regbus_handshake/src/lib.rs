//! # Regbus Handshake
//!
//! Command/status convention that lets one party request work from a module
//! and observe its completion through the shared register bus only.
//!
//! ## Roles
//!
//! - **Client** ([`HandshakeClient`]): checks Ready, writes the control block
//!   in one batch, polls status until the module's `op_count` advances.
//! - **Device** ([`DeviceLoop`]): owns a module range, executes commands
//!   through a [`CommandHandler`] and publishes Ready/Running/Alarm.
//! - **Adapters**: typed clients for the vision, gripper and angle modules.
//! - **Result queue**: FIFO of detections that runs a vision cycle when a
//!   consumer finds it empty.
//!
//! Every wait is a blocking poll with an explicit interval and deadline and
//! returns early when its [`CancelToken`](regbus_common::cancel::CancelToken)
//! fires.

pub mod angle;
pub mod block;
pub mod client;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod gripper;
pub mod queue;
pub mod vision;

pub use block::{ResultBlock, StatusBlock};
pub use client::{Completion, HandshakeClient, PendingCommand};
pub use command::Command;
pub use config::{AckMode, DeviceConfig, DuplicatePolicy, HandshakeConfig};
pub use device::{CommandHandler, DeviceHandle, DeviceLoop, DeviceState, HandlerError};
pub use error::{ErrorKind, HandshakeError, HandshakeResult};
pub use queue::{CycleSource, QueueStatus, ResultQueue};
