//! # Regbus Server Library
//!
//! Modbus TCP front end for the shared register bus.
//!
//! # Module Structure
//!
//! - [`config`] - Server configuration file layout
//! - [`core`] - BusServer struct, accept loop and connection threads
//! - [`dispatch`] - Request to bus operation mapping
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       regbus_server                              │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//! │  │ TcpListener │───►│ BusServer    │───►│ connection thread   │  │
//! │  │             │    │ (accept loop)│    │ (one per client)    │  │
//! │  └─────────────┘    └──────┬───────┘    └──────────┬──────────┘  │
//! │                            │                       │ dispatch    │
//! │                            ▼                       ▼             │
//! │                   ┌──────────────────────────────────────┐       │
//! │                   │ RegisterBus (Arc, single lock)       │       │
//! │                   └──────────────────────────────────────┘       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod core;
pub mod dispatch;

pub use crate::config::ServerConfig;
pub use crate::core::{BusServer, ServerError, ServerHandle, ServerStatus};
