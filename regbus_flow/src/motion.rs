//! Motion controller seam.
//!
//! Motion commands are queued by the controller and return as soon as they
//! are accepted. [`MotionController::sync`] blocks until every queued move
//! has settled; the orchestrator calls it at barriers.

use crate::error::MotionError;
use crate::points::Pose;

/// Robot arm driven by a flow.
pub trait MotionController: Send {
    /// Queue a joint-interpolated move.
    fn move_joint(&mut self, target: &Pose) -> Result<(), MotionError>;

    /// Queue a linear move.
    fn move_linear(&mut self, target: &Pose) -> Result<(), MotionError>;

    /// Block until all queued motion has settled.
    fn sync(&mut self) -> Result<(), MotionError>;

    /// Set a digital output.
    fn set_output(&mut self, index: u16, on: bool) -> Result<(), MotionError>;

    fn pause(&mut self) -> Result<(), MotionError>;

    fn resume(&mut self) -> Result<(), MotionError>;
}

impl<M: MotionController + ?Sized> MotionController for Box<M> {
    fn move_joint(&mut self, target: &Pose) -> Result<(), MotionError> {
        (**self).move_joint(target)
    }

    fn move_linear(&mut self, target: &Pose) -> Result<(), MotionError> {
        (**self).move_linear(target)
    }

    fn sync(&mut self) -> Result<(), MotionError> {
        (**self).sync()
    }

    fn set_output(&mut self, index: u16, on: bool) -> Result<(), MotionError> {
        (**self).set_output(index, on)
    }

    fn pause(&mut self) -> Result<(), MotionError> {
        (**self).pause()
    }

    fn resume(&mut self) -> Result<(), MotionError> {
        (**self).resume()
    }
}
