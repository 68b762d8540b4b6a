//! Named robot poses.
//!
//! Stored as a JSON object keyed by point name:
//!
//! ```json
//! {
//!   "pick_above": { "x": 250.0, "y": -40.0, "z": 60.0, "r": 0.0 },
//!   "place":      { "x": 180.0, "y": 210.0, "z": 15.0, "r": 90.0 }
//! }
//! ```

use crate::error::{FlowError, FlowResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Cartesian pose: millimetres and degrees of end-effector rotation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub r: f64,
}

impl Pose {
    pub const fn new(x: f64, y: f64, z: f64, r: f64) -> Self {
        Self { x, y, z, r }
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.2}, {:.2}, {:.2}, r={:.2})",
            self.x, self.y, self.z, self.r
        )
    }
}

/// Named pose table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointTable {
    points: BTreeMap<String, Pose>,
}

impl PointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> FlowResult<Self> {
        let content = fs::read_to_string(path)?;
        let table: Self = serde_json::from_str(&content)?;
        info!(path = %path.display(), points = table.len(), "point table loaded");
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> FlowResult<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), points = self.len(), "point table saved");
        Ok(())
    }

    pub fn get(&self, name: &str) -> FlowResult<Pose> {
        self.points
            .get(name)
            .copied()
            .ok_or_else(|| FlowError::UnknownPoint(name.to_string()))
    }

    /// Insert or replace; returns the previous pose.
    pub fn insert(&mut self, name: impl Into<String>, pose: Pose) -> Option<Pose> {
        self.points.insert(name.into(), pose)
    }

    pub fn remove(&mut self, name: &str) -> Option<Pose> {
        self.points.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.points.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl FromIterator<(String, Pose)> for PointTable {
    fn from_iter<I: IntoIterator<Item = (String, Pose)>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}
