//! `robot-console` - operator console core for a networked robot controller.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Console configuration (`console.toml`).
pub mod config;
/// Operator facade wiring state, interlock, RPC and executor.
pub mod console;
/// Console errors.
pub mod error;
/// Scripted controller for tests and dry runs.
pub mod harness;
/// Emergency interlock gate.
pub mod interlock;
/// Operator log and state-change events.
pub mod journal;
/// Program upload and line-stream execution.
pub mod program;
/// Bounded command log.
pub mod queue;
/// Periodic state reconciliation.
pub mod reconcile;
/// Optimistic relay toggles with rollback.
pub mod relay;
/// RPC client and envelope codec.
pub mod rpc;
/// Session credentials supplied by the operator.
pub mod session;
/// Controller state document parsing.
pub mod snapshot;
/// Device state store.
pub mod state;
/// HTTP transport seam.
pub mod transport;

pub use config::ConsoleConfig;
pub use console::Console;
pub use error::ConsoleError;
pub use session::Session;
pub use state::{DeviceState, Position};
