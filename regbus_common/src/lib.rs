//! Regbus Common Library
//!
//! This crate provides shared constants, the register layout schema and
//! configuration loading utilities for all regbus workspace crates.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Bus-wide numeric limits and default addresses
//! - [`status`] - Handshake status word and result codes
//! - [`layout`] - Per-module register layouts and the overlap registry
//! - [`words`] - Packing helpers for multi-register values
//! - [`cancel`] - Cooperative cancellation token
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use regbus_common::prelude::*;
//! use regbus_common::layout::ModuleLayout;
//! ```

pub mod cancel;
pub mod config;
pub mod consts;
pub mod layout;
pub mod prelude;
pub mod status;
pub mod words;
