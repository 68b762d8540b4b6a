//! Handshake timing and policy configuration.
//!
//! ```toml
//! [handshake]
//! poll_interval_ms = 100
//! completion_timeout_ms = 10000
//! ack_mode = "explicit"
//!
//! [device]
//! poll_interval_ms = 50
//! ack_mode = "auto_clear"
//! settle_ms = 500
//! duplicate_policy = "reject"
//! reset_opcode = 32
//! ```

use regbus_common::config::ConfigError;
use regbus_common::prelude::{DEFAULT_COMPLETION_TIMEOUT, DEFAULT_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a completed command register returns to NOP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// The client writes NOP after observing completion; the module restores
    /// Ready only then.
    #[default]
    Explicit,
    /// The module clears its own command register after a settle delay.
    AutoClear,
}

/// What a module does with a command whose id equals the last completed id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Do not execute; publish `ResultCode::Duplicate`.
    #[default]
    Reject,
    /// Execute again.
    Execute,
}

/// Client-side handshake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub poll_interval_ms: u64,
    /// How long `wait_for_ready` waits before NOT_READY.
    pub ready_timeout_ms: u64,
    pub completion_timeout_ms: u64,
    pub ack_mode: AckMode,
    /// Tag commands without an id with the next id after the module's last one.
    pub assign_command_ids: bool,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            ready_timeout_ms: 5_000,
            completion_timeout_ms: DEFAULT_COMPLETION_TIMEOUT.as_millis() as u64,
            ack_mode: AckMode::Explicit,
            assign_command_ids: true,
        }
    }
}

impl HandshakeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "handshake.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.completion_timeout_ms < self.poll_interval_ms {
            return Err(ConfigError::ValidationError(format!(
                "handshake.completion_timeout_ms ({}) shorter than poll interval ({})",
                self.completion_timeout_ms, self.poll_interval_ms
            )));
        }
        Ok(())
    }
}

/// Device-side loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub poll_interval_ms: u64,
    pub ack_mode: AckMode,
    /// Delay before an auto-clear module clears its command register.
    pub settle_ms: u64,
    pub duplicate_policy: DuplicatePolicy,
    /// Only opcode accepted while in Alarm; `None` makes Alarm terminal.
    pub reset_opcode: Option<u16>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            ack_mode: AckMode::Explicit,
            settle_ms: 500,
            duplicate_policy: DuplicatePolicy::Reject,
            reset_opcode: None,
        }
    }
}

impl DeviceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(10..=500).contains(&self.poll_interval_ms) {
            return Err(ConfigError::ValidationError(format!(
                "device.poll_interval_ms must be in 10..=500, got {}",
                self.poll_interval_ms
            )));
        }
        if self.reset_opcode == Some(regbus_common::consts::NOP) {
            return Err(ConfigError::ValidationError(
                "device.reset_opcode cannot be NOP".into(),
            ));
        }
        Ok(())
    }
}
