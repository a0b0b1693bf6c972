//! The `Driver` capability every leaf Component consumes, and the reference
//! adapters implementing it (SPEC_FULL.md §4.1).

pub mod power_supply;
pub mod remote_shell;
pub mod serial_line;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

pub use power_supply::PowerSupplyDriver;
pub use remote_shell::RemoteShellDriver;
pub use serial_line::SerialLineDriver;

/// Recoverable-vs-fatal classification for a failed command, per
/// SPEC_FULL.md §7. `Warning`s are logged and drop only the offending
/// command; `Fatal`s unwind past the cycle's command step (but never past
/// the cycle itself).
#[derive(Debug, Clone)]
pub enum CommandFault {
    Warning(String),
    Fatal(String),
}

impl fmt::Display for CommandFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandFault::Warning(m) => write!(f, "warning: {m}"),
            CommandFault::Fatal(m) => write!(f, "fatal: {m}"),
        }
    }
}

impl std::error::Error for CommandFault {}

/// State reported back by [`Driver::read_state`], keyed by the
/// driver-defined channel name (not yet prefixed by the tree).
pub type DriverState = Vec<(String, crate::telemetry::TelemetryValue)>;

/// Uniform adapter every leaf Component owns. The core never interprets the
/// `verb` string passed to [`Driver::invoke`]: the owning Component maps
/// inbound command options to a verb/argument pair appropriate to its own
/// driver.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Establish the transport. Must be idempotent if already open.
    async fn open(&mut self) -> Result<(), CommandFault>;

    /// Release the transport; blocks until any owned background task has
    /// observed a stop signal and exited.
    async fn close(&mut self) -> Result<(), CommandFault>;

    /// Return driver-defined state to be projected into telemetry channels.
    async fn read_state(&mut self) -> Result<DriverState, CommandFault>;

    /// Execute a driver-level verb with an arbitrary argument.
    async fn invoke(&mut self, verb: &str, arg: &Value) -> Result<(), CommandFault>;
}
