//! Flow definitions.
//!
//! A flow is an ordered list of steps for one physical work cycle. Flows are
//! kept as JSON documents:
//!
//! ```json
//! {
//!   "id": 1,
//!   "name": "pick_and_place",
//!   "steps": [
//!     { "name": "detect", "device": { "device": "vision", "action": { "action": "next_detection" } } },
//!     { "name": "above part", "move_joint": { "target": { "last_detection": { "reference": "pick_above" } } } },
//!     { "name": "grip", "device": { "device": "gripper", "action": { "action": "grip", "target": 420 } } },
//!     { "name": "place", "move_linear": { "target": { "point": "place" } }, "barrier": true }
//!   ]
//! }
//! ```

use crate::device::DeviceAction;
use crate::error::FlowResult;
use crate::points::Pose;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Where a motion step goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Named entry of the point table.
    Point(String),
    Pose(Pose),
    /// World x/y of the most recent detection; z and r come from `reference`.
    LastDetection { reference: String },
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    MoveJoint { target: Target },
    MoveLinear { target: Target },
    Device { device: String, action: DeviceAction },
    Delay { ms: u64 },
    SetOutput { index: u16, on: bool },
}

impl Operation {
    pub const fn is_motion(&self) -> bool {
        matches!(self, Self::MoveJoint { .. } | Self::MoveLinear { .. })
    }

    pub const fn is_device(&self) -> bool {
        matches!(self, Self::Device { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    pub name: String,
    #[serde(flatten)]
    pub operation: Operation,
    /// Wait for all motion to settle after this step.
    #[serde(default)]
    pub barrier: bool,
}

impl FlowStep {
    pub fn new(name: impl Into<String>, operation: Operation) -> Self {
        Self {
            name: name.into(),
            operation,
            barrier: false,
        }
    }

    pub fn with_barrier(mut self) -> Self {
        self.barrier = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Opcode that starts this flow through the flow service.
    pub id: u16,
    pub name: String,
    pub steps: Vec<FlowStep>,
}

impl FlowDefinition {
    pub fn new(id: u16, name: impl Into<String>, steps: Vec<FlowStep>) -> Self {
        Self {
            id,
            name: name.into(),
            steps,
        }
    }

    pub fn load(path: &Path) -> FlowResult<Self> {
        let flow: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        info!(id = flow.id, name = %flow.name, steps = flow.steps.len(), "flow loaded");
        Ok(flow)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
