//! Operator log and state-change events.
//!
//! The core never renders anything. Every operator-visible line lands in the
//! append-only [`OperatorLog`] (and in `tracing`), and every state, log or
//! queue change is broadcast as a [`ConsoleEvent`] for whatever front end is
//! attached.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use smol_str::SmolStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::ConsoleError;
use crate::queue::CommandLogEntry;
use crate::state::DeviceState;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp_ms: u128,
    pub level: LogLevel,
    pub message: SmolStr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    State(DeviceState),
    Log(LogLine),
    Queue(Vec<CommandLogEntry>),
}

/// Broadcast port consumed by rendering collaborators.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConsoleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ConsoleEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperatorLog {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl OperatorLog {
    fn push(&self, line: LogLine) {
        self.lines.lock().push(line);
    }

    #[must_use]
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().clone()
    }

    #[must_use]
    pub fn render(&self) -> String {
        let lines = self.lines.lock();
        let mut out = String::new();
        for line in lines.iter() {
            let _ = writeln!(out, "[{}] {}", format_timestamp(line.timestamp_ms), line.message);
        }
        out
    }

    fn clear(&self) {
        self.lines.lock().clear();
    }
}

/// Operator log plus event bus, shared by every console component.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    log: OperatorLog,
    events: EventBus,
}

impl Journal {
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            log: OperatorLog::default(),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn log(&self) -> &OperatorLog {
        &self.log
    }

    pub fn info(&self, message: impl Into<SmolStr>) {
        self.record(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<SmolStr>) {
        self.record(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<SmolStr>) {
        self.record(LogLevel::Error, message.into());
    }

    /// Drop every line, leaving a single marker entry.
    pub fn clear(&self) {
        self.log.clear();
        self.info("log cleared");
    }

    /// Write the operator log to a text file.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<(), ConsoleError> {
        let path = path.as_ref();
        std::fs::write(path, self.log.render())?;
        self.info(format!("log exported to {}", path.display()));
        Ok(())
    }

    fn record(&self, level: LogLevel, message: SmolStr) {
        match level {
            LogLevel::Info => info!(target: "robot_console::operator", "{message}"),
            LogLevel::Warn => warn!(target: "robot_console::operator", "{message}"),
            LogLevel::Error => error!(target: "robot_console::operator", "{message}"),
        }
        let line = LogLine {
            timestamp_ms: now_ms(),
            level,
            message,
        };
        self.log.push(line.clone());
        self.events.emit(ConsoleEvent::Log(line));
    }
}

pub(crate) fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

/// RFC 3339 (UTC) rendering of epoch milliseconds; falls back to the raw number.
fn format_timestamp(ms: u128) -> String {
    i128::try_from(ms)
        .ok()
        .and_then(|ms| ms.checked_mul(1_000_000))
        .and_then(|nanos| OffsetDateTime::from_unix_timestamp_nanos(nanos).ok())
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;

    #[test]
    fn lines_append_in_order_and_broadcast() {
        let journal = Journal::default();
        let mut rx = journal.events().subscribe();
        journal.info("first");
        journal.warn("second");
        let messages: Vec<_> = journal
            .log()
            .lines()
            .into_iter()
            .map(|line| (line.level, line.message))
            .collect();
        assert_eq!(
            messages,
            vec![
                (LogLevel::Info, SmolStr::new("first")),
                (LogLevel::Warn, SmolStr::new("second")),
            ]
        );
        match rx.try_recv() {
            Ok(ConsoleEvent::Log(line)) => assert_eq!(line.message, "first"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn render_uses_rfc3339_timestamps() {
        let log = OperatorLog::default();
        log.push(LogLine {
            timestamp_ms: 1_700_000_000_123,
            level: LogLevel::Info,
            message: SmolStr::new("motors on"),
        });
        expect![[r#"
            [2023-11-14T22:13:20.123Z] motors on
        "#]]
        .assert_eq(&log.render());
    }

    #[test]
    fn clear_leaves_marker_and_export_writes_file() {
        let journal = Journal::default();
        journal.error("boom");
        journal.clear();
        assert_eq!(journal.log().lines().len(), 1);

        let path = std::env::temp_dir().join(format!(
            "robot-console-log-{}-{}.txt",
            std::process::id(),
            now_ms()
        ));
        journal.export(&path).expect("export log");
        let text = std::fs::read_to_string(&path).expect("read export");
        assert!(text.contains("log cleared"));
        let _ = std::fs::remove_file(path);
    }
}
