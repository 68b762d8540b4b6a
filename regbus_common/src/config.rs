//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across all regbus applications.
//!
//! # Usage
//!
//! ```rust,no_run
//! use regbus_common::config::{BusConfig, ConfigLoader, SharedConfig, ConfigError};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct MyAppConfig {
//!     shared: SharedConfig,
//!     bus: BusConfig,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = MyAppConfig::load(Path::new("regbus.toml"))?;
//!     config.bus.validate()?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    DEFAULT_ANNOTATIONS_FILE, DEFAULT_HOST, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT,
    DEFAULT_REGISTER_COUNT, DEFAULT_UNIT_ID, MAX_REGISTER_COUNT, MAX_UNIT_ID, MIN_UNIT_ID,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across all regbus applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "regbus-cell-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Initial register value applied when the bus starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedValue {
    pub address: u16,
    /// Kept wide so that out-of-range entries are reported instead of
    /// failing the whole file at parse time.
    pub value: i64,
}

/// Register bus server settings.
///
/// # TOML Example
///
/// ```toml
/// [bus]
/// register_count = 3000
/// host = "0.0.0.0"
/// port = 502
/// unit_id = 1
/// annotations = "register_comments.json"
///
/// [[bus.seed]]
/// address = 200
/// value = 0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_register_count")]
    pub register_count: usize,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Modbus unit (slave) id answered by this server.
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Sidecar file for address labels. `None` keeps labels in memory only.
    #[serde(default = "default_annotations")]
    pub annotations: Option<PathBuf>,

    #[serde(default)]
    pub seed: Vec<SeedValue>,
}

fn default_register_count() -> usize {
    DEFAULT_REGISTER_COUNT
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_unit_id() -> u8 {
    DEFAULT_UNIT_ID
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_annotations() -> Option<PathBuf> {
    Some(PathBuf::from(DEFAULT_ANNOTATIONS_FILE))
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            register_count: DEFAULT_REGISTER_COUNT,
            host: default_host(),
            port: DEFAULT_PORT,
            unit_id: DEFAULT_UNIT_ID,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            annotations: default_annotations(),
            seed: Vec::new(),
        }
    }
}

impl BusConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `register_count` is zero or exceeds the 16-bit address space
    /// - `unit_id` is outside `1..=247`
    /// - `max_connections` is zero
    /// - a seed entry addresses a register past `register_count`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.register_count == 0 || self.register_count > MAX_REGISTER_COUNT {
            return Err(ConfigError::ValidationError(format!(
                "register_count must be in 1..={MAX_REGISTER_COUNT}, got {}",
                self.register_count
            )));
        }
        validate_unit_id(self.unit_id)?;
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if let Some(seed) = self
            .seed
            .iter()
            .find(|s| usize::from(s.address) >= self.register_count)
        {
            return Err(ConfigError::ValidationError(format!(
                "seed address {} outside register range 0..{}",
                seed.address, self.register_count
            )));
        }
        Ok(())
    }

    /// Socket address string for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Check a Modbus unit id against the addressable range `1..=247`.
pub fn validate_unit_id(unit_id: u8) -> Result<(), ConfigError> {
    if !(MIN_UNIT_ID..=MAX_UNIT_ID).contains(&unit_id) {
        return Err(ConfigError::ValidationError(format!(
            "unit_id must be in {MIN_UNIT_ID}..={MAX_UNIT_ID}, got {unit_id}"
        )));
    }
    Ok(())
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from an in-memory TOML document.
    fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Any serde-deserializable struct can use ConfigLoader.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
