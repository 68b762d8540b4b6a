//! Angle-correction module adapter.
//!
//! Result block:
//!
//! | Offset | Content                                  |
//! |--------|------------------------------------------|
//! | +0     | success flag                             |
//! | +1, +2 | contour center x, y                      |
//! | +3, +4 | angle hi/lo, signed 32-bit ×100 degrees  |
//! | +5, +6 | ellipse major, minor axis                |
//! | +7, +8 | rectangle width, height                  |
//! | +9     | contour area                             |

use crate::block::ResultBlock;
use crate::client::HandshakeClient;
use crate::command::Command;
use crate::config::HandshakeConfig;
use crate::error::{HandshakeError, HandshakeResult};
use regbus_bus::RegisterAccess;
use regbus_common::cancel::CancelToken;
use regbus_common::layout::ModuleLayout;
use regbus_common::words::decode_fixed;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const DETECT: u16 = 16;
/// Clears results and doubles as the alarm reset opcode.
pub const RESET: u16 = 32;

pub const RESULT_WIDTH: u16 = 10;

/// Contour fitting mode, sent in `param1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    #[default]
    Ellipse,
    MinAreaRect,
}

impl DetectionMode {
    pub const fn to_param(self) -> u16 {
        match self {
            Self::Ellipse => 0,
            Self::MinAreaRect => 1,
        }
    }

    pub const fn from_param(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::Ellipse),
            1 => Some(Self::MinAreaRect),
            _ => None,
        }
    }
}

/// Measured part orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct AngleResult {
    pub center_x: u16,
    pub center_y: u16,
    /// Degrees.
    pub angle: f64,
    pub major_axis: u16,
    pub minor_axis: u16,
    pub rect_width: u16,
    pub rect_height: u16,
    pub area: u16,
}

impl AngleResult {
    /// Write a successful measurement into an angle result block.
    pub fn encode(&self, results: &mut ResultBlock) -> HandshakeResult<()> {
        results.set(0, 1)?;
        results.set_slice(1, &[self.center_x, self.center_y])?;
        results.set_fixed(3, self.angle)?;
        results.set_slice(
            5,
            &[
                self.major_axis,
                self.minor_axis,
                self.rect_width,
                self.rect_height,
                self.area,
            ],
        )
    }

    /// `None` when the success flag is clear.
    pub fn decode(values: &[u16]) -> Option<Self> {
        let at = |i: usize| values.get(i).copied().unwrap_or(0);
        if at(0) == 0 {
            return None;
        }
        Some(Self {
            center_x: at(1),
            center_y: at(2),
            angle: decode_fixed(at(3), at(4)),
            major_axis: at(5),
            minor_axis: at(6),
            rect_width: at(7),
            rect_height: at(8),
            area: at(9),
        })
    }
}

/// Angle detection failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AngleError {
    /// Cycle completed but no usable contour was found.
    #[error("NO_VALID_CONTOUR")]
    NoValidContour,
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

/// Client for the angle-correction module.
#[derive(Debug)]
pub struct AngleClient<A> {
    handshake: HandshakeClient<A>,
}

impl<A: RegisterAccess> AngleClient<A> {
    pub fn new(access: A, layout: ModuleLayout, config: HandshakeConfig) -> Self {
        Self {
            handshake: HandshakeClient::new(access, layout, config),
        }
    }

    pub fn handshake(&self) -> &HandshakeClient<A> {
        &self.handshake
    }

    pub fn detect(
        &self,
        mode: DetectionMode,
        cancel: &CancelToken,
    ) -> Result<AngleResult, AngleError> {
        let command = Command::new(DETECT).with_params(mode.to_param(), 0);
        self.handshake.execute(command, cancel)?;
        let values = self.handshake.read_results(0, RESULT_WIDTH)?;
        match AngleResult::decode(&values) {
            Some(result) => {
                info!(angle = result.angle, ?mode, "angle detected");
                Ok(result)
            }
            None => {
                warn!(?mode, "no valid contour");
                Err(AngleError::NoValidContour)
            }
        }
    }

    /// Reset the module, clearing Alarm if set.
    pub fn reset(&self, cancel: &CancelToken) -> HandshakeResult<()> {
        let status = self.handshake.status()?;
        if status.status.is_alarm() {
            self.handshake.reset(RESET, cancel)?;
        } else {
            self.handshake.execute(Command::new(RESET), cancel)?;
        }
        Ok(())
    }
}
