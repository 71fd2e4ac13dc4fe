//! Console errors.

#![allow(missing_docs)]

use smol_str::SmolStr;
use thiserror::Error;

use crate::interlock::InterlockViolation;
use crate::rpc::RpcFailure;

/// Errors surfaced by console operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    /// Network or connection error reaching the controller.
    #[error("transport failure '{0}'")]
    Transport(SmolStr),

    /// Non-success status or fault marker in the controller reply.
    #[error("protocol failure '{0}'")]
    Protocol(SmolStr),

    /// Malformed state document.
    #[error("malformed state document '{0}'")]
    Parse(SmolStr),

    /// Command refused before any side effect.
    #[error("command blocked: {0}")]
    Interlock(InterlockViolation),

    /// Program line failed mid-stream.
    #[error("program aborted at line {line_no} '{line}': {reason}")]
    SequenceAbort {
        line_no: usize,
        line: SmolStr,
        reason: SmolStr,
    },

    /// Artifact upload or program fetch failed.
    #[error("upload failed '{0}'")]
    Upload(SmolStr),

    /// Configuration error.
    #[error("invalid config '{0}'")]
    InvalidConfig(SmolStr),

    /// Local file error (artifact read, log export).
    #[error("i/o error '{0}'")]
    Io(SmolStr),
}

impl From<InterlockViolation> for ConsoleError {
    fn from(value: InterlockViolation) -> Self {
        Self::Interlock(value)
    }
}

impl From<RpcFailure> for ConsoleError {
    fn from(value: RpcFailure) -> Self {
        match value {
            RpcFailure::Transport(reason) => Self::Transport(reason),
            other => Self::Protocol(other.to_string().into()),
        }
    }
}

impl From<std::io::Error> for ConsoleError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string().into())
    }
}
