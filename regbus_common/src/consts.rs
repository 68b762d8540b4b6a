//! System-wide constants for the regbus workspace.
//!
//! Single source of truth for numeric limits, protocol constants and the
//! default module address ranges.

use static_assertions::const_assert;

/// Default number of registers on the bus.
pub const DEFAULT_REGISTER_COUNT: usize = 3000;

/// Upper bound for the register count (full 16-bit address space).
pub const MAX_REGISTER_COUNT: usize = 65536;

/// Default listener host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default Modbus TCP port.
pub const DEFAULT_PORT: u16 = 502;

/// Default Modbus unit id.
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Lowest addressable unit id.
pub const MIN_UNIT_ID: u8 = 1;

/// Highest addressable unit id.
pub const MAX_UNIT_ID: u8 = 247;

/// Default limit on simultaneous client connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;

/// Default annotation sidecar file name.
pub const DEFAULT_ANNOTATIONS_FILE: &str = "register_comments.json";

/// Maximum registers in one read request (Modbus application protocol).
pub const MAX_READ_QUANTITY: u16 = 125;

/// Maximum registers in one write-multiple request.
pub const MAX_WRITE_QUANTITY: u16 = 123;

/// Command register value meaning "no command".
pub const NOP: u16 = 0;

/// Command id value meaning "no correlation id".
pub const NO_COMMAND_ID: u16 = 0;

// ─── Default module ranges ──────────────────────────────────────────

/// Vision (circle detection) module base address.
pub const VISION_BASE: u16 = 200;
pub const VISION_LEN: u16 = 100;

/// Motion/flow module base address.
pub const MOTION_BASE: u16 = 400;
pub const MOTION_LEN: u16 = 20;

/// Flow progress registers: percent, current step, total steps.
pub const PROGRESS_BASE: u16 = 420;
pub const PROGRESS_LEN: u16 = 3;

/// Gripper module base address.
pub const GRIPPER_BASE: u16 = 500;
pub const GRIPPER_LEN: u16 = 30;

/// Angle correction module base address.
pub const ANGLE_BASE: u16 = 700;
pub const ANGLE_LEN: u16 = 200;

const_assert!(MAX_WRITE_QUANTITY < MAX_READ_QUANTITY);
const_assert!((ANGLE_BASE as usize + ANGLE_LEN as usize) <= DEFAULT_REGISTER_COUNT);
const_assert!(MOTION_BASE + MOTION_LEN <= PROGRESS_BASE);
const_assert!(PROGRESS_BASE + PROGRESS_LEN <= GRIPPER_BASE);
