//! Bounded recency buffer of dispatched commands.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use smol_str::SmolStr;

use crate::config::DEFAULT_QUEUE_CAPACITY;
use crate::journal::{now_ms, ConsoleEvent, EventBus};

/// Sole entry left after an emergency trip.
pub const EMERGENCY_SENTINEL: &str = "EMERGENCY STOP - QUEUE CLEARED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLogEntry {
    pub text: SmolStr,
    pub timestamp_ms: u128,
}

/// Newest-first, fixed capacity; overflow evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct CommandLog {
    entries: VecDeque<CommandLogEntry>,
    capacity: usize,
}

impl Default for CommandLog {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl CommandLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, text: impl Into<SmolStr>) {
        self.entries.push_front(CommandLogEntry {
            text: text.into(),
            timestamp_ms: now_ms(),
        });
        self.entries.truncate(self.capacity);
    }

    /// Replace everything with the emergency sentinel.
    pub fn reset_to_sentinel(&mut self) {
        self.entries.clear();
        self.push(EMERGENCY_SENTINEL);
    }

    /// Holds nothing but the emergency sentinel.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.entries.len() == 1 && self.entries[0].text == EMERGENCY_SENTINEL
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandLogEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn texts(&self) -> Vec<SmolStr> {
        self.entries.iter().map(|entry| entry.text.clone()).collect()
    }
}

/// Shared [`CommandLog`] that announces every change on the event bus.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    log: Arc<Mutex<CommandLog>>,
    events: EventBus,
}

impl CommandQueue {
    #[must_use]
    pub fn new(capacity: usize, events: EventBus) -> Self {
        Self {
            log: Arc::new(Mutex::new(CommandLog::new(capacity))),
            events,
        }
    }

    pub fn push(&self, text: impl Into<SmolStr>) {
        self.update(|log| log.push(text));
    }

    pub fn reset_to_sentinel(&self) {
        self.update(CommandLog::reset_to_sentinel);
    }

    /// Clear to the sentinel unless that is already all the queue holds.
    /// Returns whether anything changed.
    pub fn clear_for_emergency(&self) -> bool {
        if self.log.lock().is_cleared() {
            return false;
        }
        self.reset_to_sentinel();
        true
    }

    #[must_use]
    pub fn entries(&self) -> Vec<CommandLogEntry> {
        self.log.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn texts(&self) -> Vec<SmolStr> {
        self.log.lock().texts()
    }

    fn update(&self, f: impl FnOnce(&mut CommandLog)) {
        let entries = {
            let mut log = self.log.lock();
            f(&mut log);
            log.iter().cloned().collect()
        };
        self.events.emit(ConsoleEvent::Queue(entries));
    }
}
