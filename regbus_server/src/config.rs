//! Server configuration file.
//!
//! ```toml
//! [shared]
//! service_name = "regbus"
//! log_level = "info"
//!
//! [bus]
//! port = 502
//! unit_id = 1
//!
//! [[modules]]
//! name = "vision"
//! base = 200
//! len = 100
//! ```
//!
//! When no `[[modules]]` are given the default cell layout (vision, motion,
//! gripper, angle) is used. The flow progress range is always registered.

use regbus_common::config::{BusConfig, ConfigError, SharedConfig};
use regbus_common::layout::{
    AddressRange, LayoutError, LayoutRegistry, ModuleLayout, default_layouts,
    default_progress_range,
};
use serde::Deserialize;

/// Complete server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Common service settings.
    pub shared: SharedConfig,

    /// Register array and listener settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// Module register layouts.
    #[serde(default = "default_layouts")]
    pub modules: Vec<ModuleLayout>,

    /// Flow progress registers.
    #[serde(default = "default_progress_range")]
    pub progress: AddressRange,
}

impl ServerConfig {
    /// Built-in configuration used when no file is given.
    pub fn with_defaults(service_name: &str) -> Self {
        Self {
            shared: SharedConfig {
                log_level: Default::default(),
                service_name: service_name.to_string(),
            },
            bus: BusConfig::default(),
            modules: default_layouts(),
            progress: default_progress_range(),
        }
    }

    /// Validate settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.bus.validate()
    }

    /// Check every module layout and the progress range for overlaps.
    pub fn layout_registry(&self) -> Result<LayoutRegistry, LayoutError> {
        let mut registry =
            LayoutRegistry::from_layouts(self.bus.register_count, self.modules.iter().cloned())?;
        registry.register_range("progress", self.progress)?;
        Ok(registry)
    }
}
