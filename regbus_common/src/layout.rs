//! Per-module register layouts.
//!
//! Every module owns one contiguous range `[base, base + len)` on the bus,
//! split into three blocks:
//!
//! - **Control** (4 registers): `command`, `param1`, `param2`, `command_id`.
//!   Contiguous so that a single batch write delivers a whole command.
//! - **Status** (5 registers): `status`, `error_count`, `op_count`,
//!   `result_code`, `last_command_id`.
//! - **Results** (`result_len` registers): module-specific outputs.
//!
//! Block offsets are relative to `base`. [`LayoutRegistry`] checks every
//! layout at startup and rejects overlapping ranges.
//!
//! # TOML Example
//!
//! ```toml
//! [[modules]]
//! name = "vision"
//! base = 200
//! len = 100
//! result_len = 40
//! ```

use crate::consts::{
    ANGLE_BASE, ANGLE_LEN, GRIPPER_BASE, GRIPPER_LEN, MOTION_BASE, MOTION_LEN, PROGRESS_BASE,
    PROGRESS_LEN, VISION_BASE, VISION_LEN,
};
use crate::status::StatusWord;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Control block width.
pub const CONTROL_WIDTH: u16 = 4;

/// Status block width.
pub const STATUS_WIDTH: u16 = 5;

/// Layout validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("module '{module}' has zero length")]
    Empty { module: String },

    #[error("module '{module}' range {start}..{end} exceeds the {register_count}-register bus")]
    OutsideBus {
        module: String,
        start: usize,
        end: usize,
        register_count: usize,
    },

    #[error("module '{module}' block '{block}' at +{offset} (width {width}) exceeds length {len}")]
    BlockOutsideRange {
        module: String,
        block: &'static str,
        offset: u16,
        width: u16,
        len: u16,
    },

    #[error("module '{module}' blocks '{first}' and '{second}' overlap")]
    BlockOverlap {
        module: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("module '{first}' {first_range} overlaps module '{second}' {second_range}")]
    RangeOverlap {
        first: String,
        first_range: AddressRange,
        second: String,
        second_range: AddressRange,
    },

    #[error("module name '{0}' registered twice")]
    DuplicateName(String),

    #[error("module '{0}' not registered")]
    UnknownModule(String),
}

/// Half-open register address range `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: u16,
    pub len: u16,
}

impl AddressRange {
    pub const fn new(start: u16, len: u16) -> Self {
        Self { start, len }
    }

    /// One past the last address. Wide to cover ranges ending at 65536.
    pub const fn end(&self) -> usize {
        self.start as usize + self.len as usize
    }

    pub const fn contains(&self, addr: u16) -> bool {
        addr >= self.start && (addr as usize) < self.end()
    }

    pub const fn overlaps(&self, other: &AddressRange) -> bool {
        (self.start as usize) < other.end() && (other.start as usize) < self.end()
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}

/// Block offsets relative to the module base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOffsets {
    #[serde(default = "default_control")]
    pub control: u16,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default = "default_results")]
    pub results: u16,
}

fn default_control() -> u16 {
    0
}

fn default_status() -> u16 {
    CONTROL_WIDTH
}

fn default_results() -> u16 {
    CONTROL_WIDTH + STATUS_WIDTH
}

impl Default for BlockOffsets {
    fn default() -> Self {
        Self {
            control: default_control(),
            status: default_status(),
            results: default_results(),
        }
    }
}

/// Named field inside a module range, used for validation and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: u16,
    pub width: u16,
}

/// Register layout of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLayout {
    pub name: String,
    pub base: u16,
    pub len: u16,
    #[serde(default)]
    pub offsets: BlockOffsets,
    /// Result block width. Defaults to the remainder of the range.
    #[serde(default)]
    pub result_len: Option<u16>,
}

impl ModuleLayout {
    /// Layout with default block offsets and a result block filling the range.
    pub fn new(name: impl Into<String>, base: u16, len: u16) -> Self {
        Self {
            name: name.into(),
            base,
            len,
            offsets: BlockOffsets::default(),
            result_len: None,
        }
    }

    pub fn with_offsets(mut self, offsets: BlockOffsets) -> Self {
        self.offsets = offsets;
        self
    }

    pub fn with_result_len(mut self, result_len: u16) -> Self {
        self.result_len = Some(result_len);
        self
    }

    pub fn vision() -> Self {
        Self::new("vision", VISION_BASE, VISION_LEN)
    }

    pub fn motion() -> Self {
        Self::new("motion", MOTION_BASE, MOTION_LEN)
    }

    pub fn gripper() -> Self {
        Self::new("gripper", GRIPPER_BASE, GRIPPER_LEN)
    }

    pub fn angle() -> Self {
        Self::new("angle", ANGLE_BASE, ANGLE_LEN)
    }

    pub fn range(&self) -> AddressRange {
        AddressRange::new(self.base, self.len)
    }

    /// Effective result block width.
    pub fn result_width(&self) -> u16 {
        self.result_len
            .unwrap_or_else(|| self.len.saturating_sub(self.offsets.results))
    }

    // ─── Absolute addresses ─────────────────────────────────────────

    pub fn control_block(&self) -> AddressRange {
        AddressRange::new(self.base + self.offsets.control, CONTROL_WIDTH)
    }

    pub fn status_block(&self) -> AddressRange {
        AddressRange::new(self.base + self.offsets.status, STATUS_WIDTH)
    }

    pub fn result_block(&self) -> AddressRange {
        AddressRange::new(self.base + self.offsets.results, self.result_width())
    }

    pub fn command_addr(&self) -> u16 {
        self.base + self.offsets.control
    }

    pub fn param1_addr(&self) -> u16 {
        self.command_addr() + 1
    }

    pub fn param2_addr(&self) -> u16 {
        self.command_addr() + 2
    }

    pub fn command_id_addr(&self) -> u16 {
        self.command_addr() + 3
    }

    pub fn status_addr(&self) -> u16 {
        self.base + self.offsets.status
    }

    pub fn error_count_addr(&self) -> u16 {
        self.status_addr() + 1
    }

    pub fn op_count_addr(&self) -> u16 {
        self.status_addr() + 2
    }

    pub fn result_code_addr(&self) -> u16 {
        self.status_addr() + 3
    }

    pub fn last_command_id_addr(&self) -> u16 {
        self.status_addr() + 4
    }

    /// Absolute address of a result register.
    pub fn result_addr(&self, offset: u16) -> u16 {
        self.base + self.offsets.results + offset
    }

    /// Field table used for validation and register annotations.
    pub fn fields(&self) -> [Field; 3] {
        [
            Field {
                name: "control",
                offset: self.offsets.control,
                width: CONTROL_WIDTH,
            },
            Field {
                name: "status",
                offset: self.offsets.status,
                width: STATUS_WIDTH,
            },
            Field {
                name: "results",
                offset: self.offsets.results,
                width: self.result_width(),
            },
        ]
    }

    /// Status word bit layout shared by every module.
    pub fn status_bits(&self) -> [(&'static str, StatusWord); 4] {
        [
            ("ready", StatusWord::READY),
            ("running", StatusWord::RUNNING),
            ("alarm", StatusWord::ALARM),
            ("initialized", StatusWord::INITIALIZED),
        ]
    }

    /// Human-readable labels for the fixed control and status registers.
    pub fn register_labels(&self) -> Vec<(u16, String)> {
        let names = [
            (self.command_addr(), "command"),
            (self.param1_addr(), "param1"),
            (self.param2_addr(), "param2"),
            (self.command_id_addr(), "command_id"),
            (self.status_addr(), "status"),
            (self.error_count_addr(), "error_count"),
            (self.op_count_addr(), "op_count"),
            (self.result_code_addr(), "result_code"),
            (self.last_command_id_addr(), "last_command_id"),
        ];
        names
            .into_iter()
            .map(|(addr, field)| (addr, format!("{}.{}", self.name, field)))
            .collect()
    }

    /// Check the layout in isolation: non-empty, blocks inside the range
    /// and not overlapping one another.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.len == 0 {
            return Err(LayoutError::Empty {
                module: self.name.clone(),
            });
        }
        let fields = self.fields();
        for field in &fields {
            if usize::from(field.offset) + usize::from(field.width) > usize::from(self.len) {
                return Err(LayoutError::BlockOutsideRange {
                    module: self.name.clone(),
                    block: field.name,
                    offset: field.offset,
                    width: field.width,
                    len: self.len,
                });
            }
        }
        for (i, a) in fields.iter().enumerate() {
            for b in &fields[i + 1..] {
                let ra = AddressRange::new(a.offset, a.width);
                let rb = AddressRange::new(b.offset, b.width);
                if a.width > 0 && b.width > 0 && ra.overlaps(&rb) {
                    return Err(LayoutError::BlockOverlap {
                        module: self.name.clone(),
                        first: a.name,
                        second: b.name,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Registered layouts and plain ranges, kept free of overlaps.
#[derive(Debug, Clone, Default)]
pub struct LayoutRegistry {
    register_count: usize,
    entries: Vec<(String, AddressRange)>,
    modules: Vec<ModuleLayout>,
}

impl LayoutRegistry {
    pub fn new(register_count: usize) -> Self {
        Self {
            register_count,
            entries: Vec::new(),
            modules: Vec::new(),
        }
    }

    /// Build a registry from a list of layouts, failing on the first conflict.
    pub fn from_layouts(
        register_count: usize,
        layouts: impl IntoIterator<Item = ModuleLayout>,
    ) -> Result<Self, LayoutError> {
        let mut registry = Self::new(register_count);
        for layout in layouts {
            registry.register(layout)?;
        }
        Ok(registry)
    }

    /// Validate and add a module layout.
    pub fn register(&mut self, layout: ModuleLayout) -> Result<(), LayoutError> {
        layout.validate()?;
        self.claim(&layout.name, layout.range())?;
        self.modules.push(layout);
        Ok(())
    }

    /// Add a plain named range (e.g. flow progress registers).
    pub fn register_range(
        &mut self,
        name: impl Into<String>,
        range: AddressRange,
    ) -> Result<(), LayoutError> {
        let name = name.into();
        if range.len == 0 {
            return Err(LayoutError::Empty { module: name });
        }
        self.claim(&name, range)
    }

    fn claim(&mut self, name: &str, range: AddressRange) -> Result<(), LayoutError> {
        if range.end() > self.register_count {
            return Err(LayoutError::OutsideBus {
                module: name.to_string(),
                start: usize::from(range.start),
                end: range.end(),
                register_count: self.register_count,
            });
        }
        if self.entries.iter().any(|(n, _)| n == name) {
            return Err(LayoutError::DuplicateName(name.to_string()));
        }
        if let Some((other, other_range)) = self.entries.iter().find(|(_, r)| r.overlaps(&range)) {
            return Err(LayoutError::RangeOverlap {
                first: other.clone(),
                first_range: *other_range,
                second: name.to_string(),
                second_range: range,
            });
        }
        self.entries.push((name.to_string(), range));
        Ok(())
    }

    pub fn module(&self, name: &str) -> Result<&ModuleLayout, LayoutError> {
        self.modules
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| LayoutError::UnknownModule(name.to_string()))
    }

    pub fn modules(&self) -> &[ModuleLayout] {
        &self.modules
    }

    /// All claimed ranges in registration order.
    pub fn ranges(&self) -> impl Iterator<Item = (&str, AddressRange)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), *r))
    }

    /// Name of the range owning `addr`, if any.
    pub fn owner_of(&self, addr: u16) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, r)| r.contains(addr))
            .map(|(n, _)| n.as_str())
    }
}

/// Default cell layout: vision, motion (+ progress), gripper, angle.
pub fn default_layouts() -> Vec<ModuleLayout> {
    vec![
        ModuleLayout::vision(),
        ModuleLayout::motion(),
        ModuleLayout::gripper(),
        ModuleLayout::angle(),
    ]
}

/// Default flow progress range.
pub const fn default_progress_range() -> AddressRange {
    AddressRange::new(PROGRESS_BASE, PROGRESS_LEN)
}
