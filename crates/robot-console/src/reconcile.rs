//! Periodic reconciliation against the controller's state document.
//!
//! Every successful poll overwrites local state unconditionally
//! (last poll wins), including values an in-flight toggle has just set
//! optimistically. Failed or malformed polls leave state untouched and
//! never stop the loop. A poll reporting an active emergency stop also
//! clears the command queue to the emergency sentinel.

#![allow(missing_docs)]

use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::ConsoleError;
use crate::queue::CommandQueue;
use crate::rpc::{CallOptions, RpcClient, RpcFailure};
use crate::snapshot::{parse_state_document, Snapshot};
use crate::state::StateStore;
use crate::transport::Transport;

pub const STATE_METHOD: &str = "getEstado";

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Applied(Snapshot),
    Unreachable(RpcFailure),
    Malformed(ConsoleError),
}

impl PollOutcome {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

pub struct Reconciler<T> {
    rpc: RpcClient<T>,
    state: StateStore,
    queue: CommandQueue,
}

impl<T> Clone for Reconciler<T> {
    fn clone(&self) -> Self {
        Self {
            rpc: self.rpc.clone(),
            state: self.state.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl<T: Transport> Reconciler<T> {
    pub fn new(rpc: RpcClient<T>, state: StateStore, queue: CommandQueue) -> Self {
        Self { rpc, state, queue }
    }

    pub async fn poll_once(&self, options: CallOptions) -> PollOutcome {
        let journal = self.rpc.journal();
        if !options.silent {
            journal.info("refreshing system state");
        }
        let body = match self.rpc.call(STATE_METHOD, json!({}), options).await {
            Ok(body) => body,
            Err(failure) => return PollOutcome::Unreachable(failure),
        };
        match parse_state_document(&body) {
            Ok(snapshot) => {
                let transition = self.state.overwrite(&snapshot);
                if snapshot.emergency {
                    self.queue.clear_for_emergency();
                    if !transition.before.emergency {
                        journal.error("emergency stop reported by controller");
                    }
                }
                if !options.silent {
                    journal.info("system state updated");
                }
                PollOutcome::Applied(snapshot)
            }
            Err(err) => {
                if options.silent {
                    warn!(%err, "discarding state poll");
                } else {
                    journal.warn(format!("could not read system state: {err}"));
                }
                PollOutcome::Malformed(err)
            }
        }
    }

    /// Start silent polling every `period`, first poll one period from now.
    pub fn start(self, period: Duration) -> PollHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut polls = 0_u64;
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    () = async {
                        ticker.tick().await;
                        self.poll_once(CallOptions::SILENT).await;
                    } => polls += 1,
                }
            }
            debug!(polls, "reconciliation loop stopped");
            polls
        });
        PollHandle { stop_tx, task }
    }
}

/// Running reconciliation schedule. Dropping the handle also ends the loop.
#[derive(Debug)]
pub struct PollHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl PollHandle {
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Invalidate the schedule, cancelling any in-flight poll, and return
    /// how many polls completed.
    pub async fn stop(self) -> u64 {
        let _ = self.stop_tx.send(true);
        self.task.await.unwrap_or_default()
    }
}
