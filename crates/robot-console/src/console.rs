//! Operator facade.
//!
//! [`Console`] wires one controller endpoint to the state store, command
//! queue, interlock, relay toggles, reconciliation loop and program
//! executor, and exposes the operator's actions as async methods. Rendering
//! is left to whoever subscribes to [`Console::subscribe`].

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use smol_str::SmolStr;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::ConsoleConfig;
use crate::error::ConsoleError;
use crate::interlock::{check_dispatch, Interlock, InterlockState};
use crate::journal::{ConsoleEvent, EventBus, Journal};
use crate::program::{Artifact, ProgramExecutor, ProgramReport, LINE_METHOD};
use crate::queue::{CommandLogEntry, CommandQueue};
use crate::reconcile::{PollHandle, PollOutcome, Reconciler};
use crate::relay::{RelayToggle, ToggleOutcome, GRIPPER, MOTORS, REMOTE};
use crate::rpc::{CallOptions, RpcClient};
use crate::session::Session;
use crate::state::{DeviceState, Position, StateStore};
use crate::transport::{Endpoint, HttpTransport, Transport};

/// Feed rate used by [`Console::move_to`] when none is given.
pub const DEFAULT_FEED_RATE: f64 = 1200.0;

struct Shared<T> {
    config: ConsoleConfig,
    rpc: RpcClient<T>,
    state: StateStore,
    queue: CommandQueue,
    interlock: Interlock<T>,
    relays: RelayToggle<T>,
    reconciler: Reconciler<T>,
    executor: ProgramExecutor<T>,
    poller: Mutex<Option<PollHandle>>,
}

/// Operator console bound to one controller.
pub struct Console<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Console<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Console<HttpTransport> {
    /// Console talking HTTP to the configured (or session-supplied) controller.
    #[must_use]
    pub fn connect(config: ConsoleConfig, session: Session) -> Self {
        let transport = HttpTransport::new(config.controller.timeout);
        Self::with_transport(config, session, Arc::new(transport))
    }
}

impl<T: Transport> Console<T> {
    /// Console over an arbitrary transport.
    pub fn with_transport(config: ConsoleConfig, session: Session, transport: Arc<T>) -> Self {
        let events = EventBus::new();
        let journal = Journal::new(events.clone());
        let endpoint = Endpoint::resolve(&config, &session);
        let rpc = RpcClient::new(transport, endpoint, session, journal);
        let state = StateStore::new(events.clone());
        let queue = CommandQueue::new(config.queue_capacity, events);
        let shared = Shared {
            interlock: Interlock::new(rpc.clone(), state.clone(), queue.clone()),
            relays: RelayToggle::new(rpc.clone(), state.clone(), queue.clone()),
            reconciler: Reconciler::new(rpc.clone(), state.clone(), queue.clone()),
            executor: ProgramExecutor::new(
                rpc.clone(),
                state.clone(),
                queue.clone(),
                config.program.clone(),
            ),
            config,
            rpc,
            state,
            queue,
            poller: Mutex::new(None),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ConsoleConfig {
        &self.shared.config
    }

    /// Copy of the current device state.
    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.shared.state.snapshot()
    }

    #[must_use]
    pub fn interlock_state(&self) -> InterlockState {
        self.shared.interlock.current()
    }

    /// Command queue, newest first.
    #[must_use]
    pub fn queue(&self) -> Vec<CommandLogEntry> {
        self.shared.queue.entries()
    }

    #[must_use]
    pub fn queue_texts(&self) -> Vec<SmolStr> {
        self.shared.queue.texts()
    }

    #[must_use]
    pub fn journal(&self) -> &Journal {
        self.shared.rpc.journal()
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        self.shared.rpc.endpoint()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.journal().events().subscribe()
    }

    /// Whether motors or gripper are currently on.
    #[must_use]
    pub fn outputs_active(&self) -> bool {
        self.shared.state.read(DeviceState::outputs_active)
    }

    /// Log the session, run one loud poll and start periodic polling.
    pub async fn initialize(&self) -> PollOutcome {
        let journal = self.journal();
        journal.info("operator console started");
        journal.info(format!("controller: {}", self.endpoint().base_url()));
        self.show_session();
        let outcome = self.refresh_status().await;
        self.start_polling();
        outcome
    }

    /// One loud reconciliation.
    pub async fn refresh_status(&self) -> PollOutcome {
        self.shared.reconciler.poll_once(CallOptions::LOUD).await
    }

    /// Start the periodic loop at the configured interval. Returns `false`
    /// if it was already running.
    pub fn start_polling(&self) -> bool {
        self.start_polling_every(self.shared.config.poll_interval)
    }

    pub fn start_polling_every(&self, period: Duration) -> bool {
        let mut poller = self.shared.poller.lock();
        if poller.as_ref().is_some_and(PollHandle::is_running) {
            return false;
        }
        *poller = Some(self.shared.reconciler.clone().start(period));
        true
    }

    /// Stop the periodic loop; returns the number of polls it completed.
    pub async fn stop_polling(&self) -> Option<u64> {
        let handle = self.shared.poller.lock().take();
        match handle {
            Some(handle) => Some(handle.stop().await),
            None => None,
        }
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.shared
            .poller
            .lock()
            .as_ref()
            .is_some_and(PollHandle::is_running)
    }

    pub async fn emergency_stop(&self) -> InterlockState {
        self.shared.interlock.trip().await
    }

    pub async fn reset_emergency(&self) -> InterlockState {
        self.shared.interlock.reset().await
    }

    pub async fn toggle_motors(&self) -> Result<ToggleOutcome, ConsoleError> {
        Ok(self.shared.relays.toggle(&MOTORS).await?)
    }

    pub async fn toggle_gripper(&self) -> Result<ToggleOutcome, ConsoleError> {
        Ok(self.shared.relays.toggle(&GRIPPER).await?)
    }

    /// Never gated, so remote control can be re-enabled at any time.
    pub async fn toggle_remote(&self) -> Result<ToggleOutcome, ConsoleError> {
        Ok(self.shared.relays.toggle(&REMOTE).await?)
    }

    /// Flip absolute/relative positioning. Applied locally first, not rolled back.
    pub async fn toggle_mode(&self) -> Result<bool, ConsoleError> {
        self.gate("mode change")?;
        let absolute = self
            .shared
            .state
            .mutate(|state| state.absolute_mode = !state.absolute_mode)
            .after
            .absolute_mode;
        let (code, method, label) = if absolute {
            ("G90", "setAbs", "absolute")
        } else {
            ("G91", "setRel", "relative")
        };
        self.journal().info(format!("positioning mode: {label}"));
        self.dispatch(code, method, json!({})).await?;
        Ok(absolute)
    }

    /// Linear move to `target` at `feed` (mm/min).
    pub async fn move_to(&self, target: Position, feed: Option<f64>) -> Result<(), ConsoleError> {
        self.gate("move")?;
        let feed = feed.unwrap_or(DEFAULT_FEED_RATE);
        self.shared.state.mutate(|state| state.position = target);
        let code = format!(
            "G1 X{} Y{} Z{} F{}",
            target.x, target.y, target.z, feed
        );
        self.dispatch(
            code,
            "move",
            json!({ "x": target.x, "y": target.y, "z": target.z, "f": feed }),
        )
        .await
    }

    /// Issue a named controller command (`home`, ...) with no parameters.
    pub async fn send_command(&self, command: &str) -> Result<(), ConsoleError> {
        let command = command.trim();
        if command.is_empty() || command.contains(char::is_whitespace) {
            return Err(ConsoleError::Protocol(
                format!("invalid command name '{command}'").into(),
            ));
        }
        self.gate("command")?;
        self.dispatch(command, command, json!({})).await
    }

    /// Send one raw G-code line through the line channel.
    pub async fn send_line(&self, line: &str) -> Result<(), ConsoleError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ConsoleError::Protocol("empty line".into()));
        }
        self.gate("command")?;
        self.dispatch(line, LINE_METHOD, json!({ "line": line }))
            .await
    }

    /// Start recording taught positions, optionally into a named file.
    pub async fn start_learning(&self, file: Option<&str>) -> Result<(), ConsoleError> {
        self.gate("learning")?;
        let params = match file.map(str::trim).filter(|file| !file.is_empty()) {
            Some(file) => json!({ "file": file }),
            None => json!({}),
        };
        self.dispatch("Learn: start", "startLearning", params).await
    }

    pub async fn stop_learning(&self) -> Result<(), ConsoleError> {
        self.gate("learning")?;
        self.dispatch("Learn: stop", "stopLearning", json!({})).await
    }

    /// Upload an artifact, then stream the resulting job line by line.
    pub async fn upload_and_run(&self, artifact: &Artifact) -> Result<ProgramReport, ConsoleError> {
        self.shared.executor.upload_and_run(artifact).await
    }

    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<ProgramReport, ConsoleError> {
        let artifact = Artifact::from_path(path)?;
        self.upload_and_run(&artifact).await
    }

    /// Run a job stored on the controller with a single call.
    pub async fn run_file(&self, path: &str) -> Result<SmolStr, ConsoleError> {
        self.shared.executor.run_file(path).await
    }

    /// Jobs registered by uploads during this session.
    #[must_use]
    pub fn uploaded_jobs(&self) -> Vec<SmolStr> {
        self.shared.executor.jobs()
    }

    pub fn show_session(&self) {
        let summary = self.shared.rpc.session().summary();
        self.journal().info(format!("session: {summary}"));
    }

    pub fn export_log(&self, path: impl AsRef<Path>) -> Result<(), ConsoleError> {
        self.journal().export(path)
    }

    pub fn clear_log(&self) {
        self.journal().clear();
    }

    /// Stop polling. Warns when outputs are left on.
    pub async fn shutdown(&self) -> bool {
        let polls = self.stop_polling().await.unwrap_or_default();
        info!(polls, "console shut down");
        let active = self.outputs_active();
        if active {
            self.journal()
                .warn("leaving with motors or gripper still on");
        }
        active
    }

    fn gate(&self, what: &str) -> Result<(), ConsoleError> {
        self.shared.state.read(check_dispatch).map_err(|violation| {
            self.journal().error(format!("{what} blocked: {violation}"));
            ConsoleError::Interlock(violation)
        })
    }

    async fn dispatch(
        &self,
        queue_text: impl Into<SmolStr>,
        method: &str,
        params: Value,
    ) -> Result<(), ConsoleError> {
        self.shared.queue.push(queue_text);
        self.shared
            .rpc
            .call(method, params, CallOptions::LOUD)
            .await?;
        Ok(())
    }
}
