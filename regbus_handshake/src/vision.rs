//! Vision module adapter.
//!
//! Result block, relative to the module's result offset:
//!
//! | Offset | Content                                            |
//! |--------|----------------------------------------------------|
//! | +0     | circle count (max 5)                               |
//! | +1     | pixel triplets `x, y, radius`                      |
//! | +16    | world coordinates valid (0/1)                      |
//! | +17    | world `x_hi, x_lo, y_hi, y_lo` per circle, ×100    |

use crate::block::ResultBlock;
use crate::client::HandshakeClient;
use crate::command::Command;
use crate::config::HandshakeConfig;
use crate::error::{HandshakeError, HandshakeResult};
use crate::queue::CycleSource;
use chrono::{DateTime, Utc};
use regbus_bus::RegisterAccess;
use regbus_common::cancel::CancelToken;
use regbus_common::consts::VISION_LEN;
use regbus_common::layout::ModuleLayout;
use regbus_common::words::decode_fixed;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

pub const CAPTURE: u16 = 8;
pub const CAPTURE_DETECT: u16 = 16;
pub const INITIALIZE: u16 = 32;

/// Circles reported per cycle.
pub const MAX_CIRCLES: usize = 5;

const COUNT_OFFSET: u16 = 0;
const PIXEL_OFFSET: u16 = 1;
const WORLD_VALID_OFFSET: u16 = 16;
const WORLD_OFFSET: u16 = 17;

/// Result registers used by the vision module.
pub const RESULT_WIDTH: u16 = WORLD_OFFSET + 4 * MAX_CIRCLES as u16;

const_assert!(PIXEL_OFFSET as usize + 3 * MAX_CIRCLES <= WORLD_VALID_OFFSET as usize);
const_assert!(RESULT_WIDTH <= VISION_LEN - 9);

/// One detected circle as carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub pixel_x: u16,
    pub pixel_y: u16,
    pub radius: u16,
    /// Calibrated world position in mm, when available.
    pub world: Option<(f64, f64)>,
}

impl Circle {
    pub const fn pixel(pixel_x: u16, pixel_y: u16, radius: u16) -> Self {
        Self {
            pixel_x,
            pixel_y,
            radius,
            world: None,
        }
    }

    pub const fn with_world(mut self, x: f64, y: f64) -> Self {
        self.world = Some((x, y));
        self
    }
}

/// Write up to [`MAX_CIRCLES`] circles into a vision result block.
///
/// World coordinates are flagged valid only when every circle has them.
pub fn encode_circles(circles: &[Circle], results: &mut ResultBlock) -> HandshakeResult<()> {
    let circles = &circles[..circles.len().min(MAX_CIRCLES)];
    results.set(COUNT_OFFSET, circles.len() as u16)?;

    let world_valid = !circles.is_empty() && circles.iter().all(|c| c.world.is_some());
    results.set(WORLD_VALID_OFFSET, u16::from(world_valid))?;

    for (i, circle) in circles.iter().enumerate() {
        let i = i as u16;
        results.set_slice(
            PIXEL_OFFSET + 3 * i,
            &[circle.pixel_x, circle.pixel_y, circle.radius],
        )?;
        if let (true, Some((x, y))) = (world_valid, circle.world) {
            results.set_fixed(WORLD_OFFSET + 4 * i, x)?;
            results.set_fixed(WORLD_OFFSET + 4 * i + 2, y)?;
        }
    }
    Ok(())
}

/// Read circles back from result registers starting at offset 0.
pub fn decode_circles(values: &[u16]) -> Vec<Circle> {
    let at = |offset: u16| values.get(usize::from(offset)).copied().unwrap_or(0);
    let reported = usize::from(at(COUNT_OFFSET));
    if reported > MAX_CIRCLES {
        warn!(reported, "vision count above maximum, truncating");
    }
    let world_valid = at(WORLD_VALID_OFFSET) == 1;

    (0..reported.min(MAX_CIRCLES) as u16)
        .map(|i| {
            let base = PIXEL_OFFSET + 3 * i;
            let mut circle = Circle::pixel(at(base), at(base + 1), at(base + 2));
            if world_valid {
                let w = WORLD_OFFSET + 4 * i;
                circle.world = Some((
                    decode_fixed(at(w), at(w + 1)),
                    decode_fixed(at(w + 2), at(w + 3)),
                ));
            }
            circle
        })
        .collect()
}

/// A circle handed to consumers of the result queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub id: u64,
    pub world_x: Option<f64>,
    pub world_y: Option<f64>,
    pub pixel_x: u16,
    pub pixel_y: u16,
    pub radius: u16,
    pub timestamp: DateTime<Utc>,
}

impl DetectionResult {
    pub fn has_world(&self) -> bool {
        self.world_x.is_some() && self.world_y.is_some()
    }
}

/// Client for the vision module.
#[derive(Debug)]
pub struct VisionClient<A> {
    handshake: HandshakeClient<A>,
    next_id: AtomicU64,
}

impl<A: RegisterAccess> VisionClient<A> {
    pub fn new(access: A, layout: ModuleLayout, config: HandshakeConfig) -> Self {
        Self::from_client(HandshakeClient::new(access, layout, config))
    }

    pub fn from_client(handshake: HandshakeClient<A>) -> Self {
        Self {
            handshake,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn handshake(&self) -> &HandshakeClient<A> {
        &self.handshake
    }

    pub fn initialize(&self, cancel: &CancelToken) -> HandshakeResult<()> {
        self.handshake.execute(Command::new(INITIALIZE), cancel)?;
        Ok(())
    }

    pub fn capture(&self, cancel: &CancelToken) -> HandshakeResult<()> {
        self.handshake.execute(Command::new(CAPTURE), cancel)?;
        Ok(())
    }

    /// Capture and detect; returns the detections in reported order.
    pub fn capture_and_detect(&self, cancel: &CancelToken) -> HandshakeResult<Vec<DetectionResult>> {
        let completion = self.handshake.execute(Command::new(CAPTURE_DETECT), cancel)?;
        let values = self.handshake.read_results(0, RESULT_WIDTH)?;
        let timestamp = Utc::now();
        let detections: Vec<DetectionResult> = decode_circles(&values)
            .into_iter()
            .map(|circle| DetectionResult {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                world_x: circle.world.map(|(x, _)| x),
                world_y: circle.world.map(|(_, y)| y),
                pixel_x: circle.pixel_x,
                pixel_y: circle.pixel_y,
                radius: circle.radius,
                timestamp,
            })
            .collect();
        info!(
            count = detections.len(),
            elapsed_ms = completion.elapsed.as_millis() as u64,
            "detection cycle complete"
        );
        Ok(detections)
    }

    /// Like [`capture_and_detect`](Self::capture_and_detect) but requires
    /// world coordinates.
    pub fn detect_world(&self, cancel: &CancelToken) -> HandshakeResult<Vec<DetectionResult>> {
        let detections = self.capture_and_detect(cancel)?;
        if detections.iter().any(|d| !d.has_world()) {
            return Err(HandshakeError::new(
                crate::error::ErrorKind::Validation,
                "world coordinates not calibrated",
            ));
        }
        Ok(detections)
    }
}

impl<A: RegisterAccess> CycleSource<DetectionResult> for VisionClient<A> {
    fn run_cycle(&self, cancel: &CancelToken) -> HandshakeResult<Vec<DetectionResult>> {
        self.capture_and_detect(cancel)
    }
}
