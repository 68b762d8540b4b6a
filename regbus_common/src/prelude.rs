//! Prelude module for common re-exports.
//!
//! ```rust
//! use regbus_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{BusConfig, ConfigError, ConfigLoader, SeedValue, SharedConfig};

// ─── Layouts ────────────────────────────────────────────────────────
pub use crate::layout::{AddressRange, LayoutError, LayoutRegistry, ModuleLayout};

// ─── Handshake ──────────────────────────────────────────────────────
pub use crate::cancel::CancelToken;
pub use crate::consts::{NO_COMMAND_ID, NOP};
pub use crate::status::{ResultCode, StatusWord};

/// Default client poll interval for handshake waits.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default handshake completion timeout.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);
