//! # Regbus Shared Register Bus
//!
//! A fixed-size array of 16-bit registers shared by every module of a cell
//! (vision, gripper, angle correction, motion). Modules cannot call one
//! another; they publish status and consume commands through this array,
//! reached either in-process or over Modbus TCP.
//!
//! ## Features
//!
//! - **Single Lock**: One re-entrant lock guards the whole array; every single
//!   or batch operation sees a consistent snapshot
//! - **Validated Writes**: Out-of-range addresses and values are rejected and
//!   leave the array unchanged
//! - **Uniform Access**: [`RegisterAccess`] is implemented by the local bus and
//!   by the TCP client alike
//! - **Annotations**: Address labels persisted in a JSON sidecar file
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │ Device loop     │    │  RegisterBus    │    │ Client adapter  │
//! │ (status/result) ├───►│                 │◄───┤ (commands)      │
//! └─────────────────┘    │ [u16; N] + lock │    └─────────────────┘
//!                        └────────┬────────┘
//!                                 │ Modbus TCP
//!                        ┌────────▼────────┐
//!                        │ ModbusTcpClient │
//!                        └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use regbus_bus::{RegisterAccess, RegisterBus};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RegisterBus::new(3000);
//! bus.write_batch(200, &[16, 0, 0, 1])?;
//! assert_eq!(bus.read(200)?, 16);
//! assert_eq!(bus.read_registers(200, 4)?, vec![16, 0, 0, 1]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, BusError>`. Validation failures are local
//! results and never terminate a server connection:
//!
//! ```rust
//! use regbus_bus::{BusError, RegisterBus};
//!
//! let bus = RegisterBus::new(10);
//! match bus.write_value(3, 70_000) {
//!     Err(BusError::InvalidValue { address, value }) => {
//!         eprintln!("rejected {value} for register {address}");
//!     }
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod annotations;
pub mod bus;
pub mod client;
pub mod error;
pub mod monitoring;
pub mod wire;

pub use access::RegisterAccess;
pub use annotations::AnnotationStore;
pub use bus::{RegisterBus, RegisterEntry};
pub use client::{ClientConfig, ModbusTcpClient};
pub use error::{BusError, BusResult};
pub use monitoring::{BusStats, StatsSnapshot};
pub use wire::{ExceptionCode, FunctionCode, Request, Response};

/// Initialize tracing for library consumers and tests
///
/// Honours `RUST_LOG`; does nothing if a global subscriber is already set.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
