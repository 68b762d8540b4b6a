//! # Regbus Flow
//!
//! Runs one physical work cycle as an ordered list of steps: arm moves,
//! device actions over the register bus, delays and digital outputs.
//!
//! - [`FlowOrchestrator`] executes a [`FlowDefinition`], inserting motion
//!   barriers before device steps and writing progress to the bus.
//! - [`FlowOrchestrator::execute_with_retry`] re-runs a failed flow after a
//!   [`RecoveryAction`].
//! - [`FlowService`] exposes registered flows as opcodes on the motion
//!   module so any bus client can start them.
//!
//! The arm itself sits behind [`MotionController`]; devices behind
//! [`DeviceAdapter`], implemented for the vision queue, gripper and angle
//! clients.

pub mod device;
pub mod error;
pub mod flow;
pub mod motion;
pub mod orchestrator;
pub mod points;
pub mod progress;
pub mod retry;
pub mod service;

pub use device::{DeviceAction, DeviceAdapter, DeviceOutput};
pub use error::{FlowError, FlowResult, MotionError};
pub use flow::{FlowDefinition, FlowStep, Operation, Target};
pub use motion::MotionController;
pub use orchestrator::{FlowOrchestrator, FlowOutcome, FlowStatus};
pub use points::{PointTable, Pose};
pub use progress::ProgressWriter;
pub use retry::{PauseResumeRecovery, RecoveryAction, RetryPolicy};
pub use service::FlowService;
