//! Canonical device state and its store.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::journal::{ConsoleEvent, EventBus};
use crate::snapshot::{PositionMode, Snapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{:.1} Y{:.1} Z{:.1}", self.x, self.y, self.z)
    }
}

/// Device state as the operator console sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// Interlock tripped.
    pub emergency: bool,
    pub motors_on: bool,
    pub gripper_on: bool,
    /// Gates every mutating command except the remote toggle itself.
    pub remote_enabled: bool,
    pub absolute_mode: bool,
    pub position: Position,
    /// Last reconciliation succeeded.
    pub connected: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            emergency: false,
            motors_on: false,
            gripper_on: false,
            remote_enabled: true,
            absolute_mode: true,
            position: Position::default(),
            connected: false,
        }
    }
}

impl DeviceState {
    /// Whether leaving the console now would abandon powered outputs.
    #[must_use]
    pub fn outputs_active(&self) -> bool {
        self.motors_on || self.gripper_on
    }

    fn apply_snapshot(&mut self, snapshot: &Snapshot) {
        self.position = snapshot.position;
        self.absolute_mode = snapshot.mode == PositionMode::Absolute;
        self.motors_on = snapshot.motors;
        self.gripper_on = snapshot.gripper;
        self.emergency = snapshot.emergency;
        self.remote_enabled = snapshot.remote;
        self.connected = true;
    }
}

/// Boolean power relays driven through the optimistic toggle protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relay {
    Motors,
    Gripper,
    Remote,
}

impl Relay {
    #[must_use]
    pub fn get(self, state: &DeviceState) -> bool {
        match self {
            Self::Motors => state.motors_on,
            Self::Gripper => state.gripper_on,
            Self::Remote => state.remote_enabled,
        }
    }

    pub fn set(self, state: &mut DeviceState, value: bool) {
        match self {
            Self::Motors => state.motors_on = value,
            Self::Gripper => state.gripper_on = value,
            Self::Remote => state.remote_enabled = value,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Motors => "motors",
            Self::Gripper => "gripper",
            Self::Remote => "remote control",
        }
    }
}

/// Before/after pair returned by every mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub before: DeviceState,
    pub after: DeviceState,
}

impl Transition {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Single owner of [`DeviceState`].
///
/// Writes are last-write-wins per mutation; there is no sequencing between
/// an optimistic toggle and a concurrently resolving poll. The lock is only
/// held for the duration of one closure, never across an await point.
#[derive(Debug, Clone)]
pub struct StateStore {
    inner: Arc<Mutex<DeviceState>>,
    events: EventBus,
}

impl StateStore {
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self::with_state(DeviceState::default(), events)
    }

    #[must_use]
    pub fn with_state(state: DeviceState, events: EventBus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
            events,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> DeviceState {
        self.inner.lock().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&DeviceState) -> R) -> R {
        f(&self.inner.lock())
    }

    pub fn mutate(&self, f: impl FnOnce(&mut DeviceState)) -> Transition {
        let transition = {
            let mut state = self.inner.lock();
            let before = state.clone();
            f(&mut state);
            Transition {
                before,
                after: state.clone(),
            }
        };
        if transition.changed() {
            self.events.emit(ConsoleEvent::State(transition.after.clone()));
        }
        transition
    }

    /// Set a relay and return its previous value.
    pub fn set_relay(&self, relay: Relay, value: bool) -> bool {
        self.mutate(|state| relay.set(state, value))
            .before
            .relay(relay)
    }

    /// Fold a polled snapshot into the state, overwriting every mapped field.
    pub fn overwrite(&self, snapshot: &Snapshot) -> Transition {
        self.mutate(|state| state.apply_snapshot(snapshot))
    }
}

impl DeviceState {
    #[must_use]
    pub fn relay(&self, relay: Relay) -> bool {
        relay.get(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::ConsoleEvent;

    #[test]
    fn defaults_match_console_startup() {
        let state = DeviceState::default();
        assert!(state.remote_enabled);
        assert!(state.absolute_mode);
        assert!(!state.emergency);
        assert!(!state.connected);
        assert!(!state.outputs_active());
    }

    #[test]
    fn mutate_tracks_before_and_after() {
        let store = StateStore::new(EventBus::new());
        let transition = store.mutate(|state| state.motors_on = true);
        assert!(!transition.before.motors_on);
        assert!(transition.after.motors_on);
        assert!(store.snapshot().motors_on);
        assert!(store.snapshot().outputs_active());
    }

    #[test]
    fn unchanged_mutation_emits_nothing() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let store = StateStore::new(events);
        let transition = store.mutate(|state| state.remote_enabled = true);
        assert!(!transition.changed());
        assert!(rx.try_recv().is_err());

        assert!(!store.set_relay(Relay::Gripper, true));
        assert!(matches!(rx.try_recv(), Ok(ConsoleEvent::State(state)) if state.gripper_on));
    }
}
