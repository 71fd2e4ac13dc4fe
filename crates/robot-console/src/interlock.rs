//! Emergency-stop interlock.
//!
//! Two states, `Normal` and `Tripped`, stored as `DeviceState::emergency`.
//! Tripping clears the command queue to a single sentinel and notifies the
//! controller best-effort; the local transition never waits on, or depends
//! on, the notification outcome. Only [`Interlock::reset`] returns to
//! `Normal` from the operator side (a poll may still report either value).

#![allow(missing_docs)]

use serde_json::json;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::journal::now_ms;
use crate::queue::CommandQueue;
use crate::rpc::{CallOptions, RpcClient};
use crate::state::{DeviceState, StateStore};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterlockState {
    Normal,
    Tripped,
}

impl InterlockState {
    #[must_use]
    pub fn of(state: &DeviceState) -> Self {
        if state.emergency {
            Self::Tripped
        } else {
            Self::Normal
        }
    }
}

/// Reason a command was refused before any side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InterlockViolation {
    #[error("emergency stop active")]
    EmergencyActive,
    #[error("remote control disabled")]
    RemoteDisabled,
}

/// Gate for every mutating command other than the remote toggle, trip and reset.
pub fn check_dispatch(state: &DeviceState) -> Result<(), InterlockViolation> {
    if state.emergency {
        return Err(InterlockViolation::EmergencyActive);
    }
    if !state.remote_enabled {
        return Err(InterlockViolation::RemoteDisabled);
    }
    Ok(())
}

pub struct Interlock<T> {
    rpc: RpcClient<T>,
    state: StateStore,
    queue: CommandQueue,
}

impl<T: Transport> Interlock<T> {
    pub fn new(rpc: RpcClient<T>, state: StateStore, queue: CommandQueue) -> Self {
        Self { rpc, state, queue }
    }

    #[must_use]
    pub fn current(&self) -> InterlockState {
        self.state.read(InterlockState::of)
    }

    /// Trip the interlock. Re-tripping is harmless apart from a repeated notification.
    pub async fn trip(&self) -> InterlockState {
        self.state.mutate(|state| state.emergency = true);
        self.queue.reset_to_sentinel();
        self.rpc.journal().error("EMERGENCY STOP ACTIVATED");
        // Best-effort: a failed notification is logged by the client and ignored.
        let _ = self
            .rpc
            .call(
                "emergencyStop",
                json!({ "timestamp": iso_timestamp() }),
                CallOptions::LOUD,
            )
            .await;
        InterlockState::Tripped
    }

    /// Reset the interlock; the local transition is unconditional.
    pub async fn reset(&self) -> InterlockState {
        self.state.mutate(|state| state.emergency = false);
        self.rpc.journal().info("system reset: emergency cleared");
        let _ = self
            .rpc
            .call("resetEmergency", json!({}), CallOptions::LOUD)
            .await;
        InterlockState::Normal
    }
}

fn iso_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| now_ms().to_string())
}
