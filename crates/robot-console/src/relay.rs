//! Optimistic relay toggles.
//!
//! One protocol serves motors, gripper and remote-access enablement:
//! read the current value, gate the flip, apply it locally, queue the
//! command, call the controller and, if the call fails, put the previous
//! value back. Overlapping toggles of the same relay are not queued; they
//! race exactly like a toggle and a concurrent poll do.

#![allow(missing_docs)]

use serde_json::{json, Value};

use crate::interlock::{check_dispatch, InterlockViolation};
use crate::queue::CommandQueue;
use crate::rpc::{CallOptions, RpcClient, RpcFailure};
use crate::state::{DeviceState, Relay, StateStore};
use crate::transport::Transport;

/// What the controller is told for one direction of a toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayCommand {
    /// Entry for the command queue, if the toggle shows up there.
    pub queue_text: Option<&'static str>,
    pub method: &'static str,
    pub params: Value,
}

/// Parameters of the toggle protocol for one relay.
#[derive(Debug, Clone, Copy)]
pub struct RelaySpec {
    pub relay: Relay,
    /// Refuses the toggle (given the state and the value it would set).
    pub gate: fn(&DeviceState, bool) -> Result<(), InterlockViolation>,
    pub encode: fn(bool) -> RelayCommand,
}

pub const MOTORS: RelaySpec = RelaySpec {
    relay: Relay::Motors,
    gate: gate_dispatch,
    encode: encode_motors,
};

pub const GRIPPER: RelaySpec = RelaySpec {
    relay: Relay::Gripper,
    gate: gate_dispatch,
    encode: encode_gripper,
};

/// The remote toggle is never gated, so control can always be re-enabled.
pub const REMOTE: RelaySpec = RelaySpec {
    relay: Relay::Remote,
    gate: gate_open,
    encode: encode_remote,
};

fn gate_dispatch(state: &DeviceState, _next: bool) -> Result<(), InterlockViolation> {
    check_dispatch(state)
}

fn gate_open(_state: &DeviceState, _next: bool) -> Result<(), InterlockViolation> {
    Ok(())
}

fn encode_motors(on: bool) -> RelayCommand {
    RelayCommand {
        queue_text: Some(if on { "M17" } else { "M18" }),
        method: "motors",
        params: json!({ "on": on }),
    }
}

fn encode_gripper(on: bool) -> RelayCommand {
    RelayCommand {
        queue_text: Some(if on { "M3" } else { "M5" }),
        method: "gripper",
        params: json!({ "on": on }),
    }
}

fn encode_remote(on: bool) -> RelayCommand {
    RelayCommand {
        queue_text: None,
        method: if on { "enableRemote" } else { "disableRemote" },
        params: json!({}),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The controller acknowledged; `value` stays applied.
    Confirmed { value: bool },
    /// The call failed and `value` (the previous one) was restored.
    RolledBack { value: bool, reason: RpcFailure },
}

pub struct RelayToggle<T> {
    rpc: RpcClient<T>,
    state: StateStore,
    queue: CommandQueue,
}

impl<T: Transport> RelayToggle<T> {
    pub fn new(rpc: RpcClient<T>, state: StateStore, queue: CommandQueue) -> Self {
        Self { rpc, state, queue }
    }

    pub async fn toggle(&self, spec: &RelaySpec) -> Result<ToggleOutcome, InterlockViolation> {
        let relay = spec.relay;
        let journal = self.rpc.journal();

        let (previous, gate) = self
            .state
            .read(|state| (relay.get(state), (spec.gate)(state, !relay.get(state))));
        let next = !previous;
        if let Err(violation) = gate {
            journal.error(format!("{} toggle blocked: {violation}", relay.label()));
            return Err(violation);
        }

        self.state.set_relay(relay, next);
        let command = (spec.encode)(next);
        if let Some(text) = command.queue_text {
            self.queue.push(text);
        }
        journal.info(format!(
            "{} {}",
            relay.label(),
            if next { "on" } else { "off" }
        ));

        match self
            .rpc
            .call(command.method, command.params, CallOptions::LOUD)
            .await
        {
            Ok(_) => Ok(ToggleOutcome::Confirmed { value: next }),
            Err(reason) => {
                self.state.set_relay(relay, previous);
                journal.warn(format!(
                    "could not switch {} ({reason}), reverting",
                    relay.label()
                ));
                Ok(ToggleOutcome::RolledBack {
                    value: previous,
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoders_follow_controller_vocabulary() {
        assert_eq!((MOTORS.encode)(true).queue_text, Some("M17"));
        assert_eq!((MOTORS.encode)(false).queue_text, Some("M18"));
        assert_eq!((GRIPPER.encode)(true).queue_text, Some("M3"));
        assert_eq!((GRIPPER.encode)(false).method, "gripper");
        assert_eq!((REMOTE.encode)(true).method, "enableRemote");
        assert_eq!((REMOTE.encode)(false).method, "disableRemote");
        assert_eq!((REMOTE.encode)(false).queue_text, None);
    }

    #[test]
    fn remote_gate_ignores_interlock() {
        let state = DeviceState {
            emergency: true,
            remote_enabled: false,
            ..DeviceState::default()
        };
        assert!((REMOTE.gate)(&state, true).is_ok());
        assert_eq!(
            (MOTORS.gate)(&state, false),
            Err(InterlockViolation::EmergencyActive)
        );
    }
}
