//! The command wire format: the JSON envelope ingress accepts and the typed
//! [`Command`] the cycle engine dispatches through the component tree.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable integer operation codes. Values 5, 6, 11 (implicitly) and 12 are
/// reserved: [`parse_line`] rejects them at the ingress as `INVALID CMD`
/// until their semantics are specified (see SPEC_FULL.md §9, open
/// questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Operation {
    NoOp = 0,
    PwrSupplyCmd = 1,
    SerialCmd = 2,
    Recovery = 3,
    Restart = 4,
    WaitOnVar = 5,
    ForceLoad = 6,
    BringOffline = 7,
    PowerOff = 8,
    Enable = 9,
    BootedForce = 10,
    VersionCheck = 12,
}

impl Operation {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::NoOp,
            1 => Self::PwrSupplyCmd,
            2 => Self::SerialCmd,
            3 => Self::Recovery,
            4 => Self::Restart,
            5 => Self::WaitOnVar,
            6 => Self::ForceLoad,
            7 => Self::BringOffline,
            8 => Self::PowerOff,
            9 => Self::Enable,
            10 => Self::BootedForce,
            12 => Self::VersionCheck,
            _ => return None,
        })
    }

    /// `true` for operations whose semantics are reserved, not yet
    /// dispatched by the cycle engine.
    pub fn is_reserved(self) -> bool {
        matches!(self, Self::WaitOnVar | Self::ForceLoad | Self::VersionCheck)
    }
}

/// A dispatch-ready command: the decoded operation, the dotted target path,
/// and operation-specific options.
#[derive(Debug, Clone)]
pub struct Command {
    pub operation: Operation,
    pub target: String,
    pub options: Value,
}

impl Command {
    pub fn no_op() -> Self {
        Self {
            operation: Operation::NoOp,
            target: String::new(),
            options: Value::Null,
        }
    }
}

/// The raw JSON shape accepted on the wire: `{operation, target, options}`,
/// terminated by a newline. `operation` is a plain integer here so that an
/// out-of-range value can be rejected as `INVALID CMD` rather than failing
/// JSON parsing outright.
#[derive(Debug, Deserialize, Serialize)]
pub struct CommandEnvelope {
    pub operation: i64,
    pub target: String,
    #[serde(default)]
    pub options: Value,
}

impl From<&Command> for CommandEnvelope {
    fn from(c: &Command) -> Self {
        Self {
            operation: c.operation as i64,
            target: c.target.clone(),
            options: c.options.clone(),
        }
    }
}

/// Errors produced while turning a wire envelope into a dispatchable
/// [`Command`]. Distinguishes a JSON parse failure from a structurally valid
/// but semantically invalid envelope, matching the two wire-level replies in
/// SPEC_FULL.md §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeError {
    InvalidJson,
    InvalidCommand,
}

/// Reply emitted for one command-socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireAck {
    Ack,
    InvalidJson,
    InvalidCommand,
}

impl WireAck {
    pub fn as_json(self) -> Value {
        let word = match self {
            WireAck::Ack => "ACK",
            WireAck::InvalidJson => "INVALID JSON",
            WireAck::InvalidCommand => "INVALID CMD",
        };
        Value::Array(vec![Value::String(word.to_string())])
    }
}

/// Parse one line of wire text into a [`Command`], or classify the failure.
pub fn parse_line(line: &str) -> Result<Command, EnvelopeError> {
    let envelope: CommandEnvelope =
        serde_json::from_str(line).map_err(|_| EnvelopeError::InvalidJson)?;

    let operation = u8::try_from(envelope.operation)
        .ok()
        .and_then(Operation::from_u8)
        .ok_or(EnvelopeError::InvalidCommand)?;

    if operation.is_reserved() {
        return Err(EnvelopeError::InvalidCommand);
    }

    if envelope.target.is_empty() && !matches!(operation, Operation::NoOp) {
        return Err(EnvelopeError::InvalidCommand);
    }

    Ok(Command {
        operation,
        target: envelope.target,
        options: envelope.options,
    })
}
