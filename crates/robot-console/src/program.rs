//! Program upload and line-stream execution.
//!
//! An uploaded artifact (typically a CSV path) is converted by the
//! controller into a job under `jobs/<base>.<extension>`. The executor
//! fetches that job, splits it into non-empty trimmed lines and sends them
//! one `sendGcode` round-trip at a time, pausing between lines so the
//! controller's input buffer is not overrun. The first failed line ends the
//! run; nothing is retried or skipped.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use smol_str::SmolStr;
use tracing::debug;

use crate::config::ProgramConfig;
use crate::error::ConsoleError;
use crate::interlock::check_dispatch;
use crate::queue::CommandQueue;
use crate::rpc::{CallOptions, RpcClient};
use crate::state::StateStore;
use crate::transport::{HttpRequest, Transport};

pub const LINE_METHOD: &str = "sendGcode";
pub const RUN_FILE_METHOD: &str = "runFile";

/// A local file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: SmolStr,
    pub bytes: Vec<u8>,
}

impl Artifact {
    #[must_use]
    pub fn new(name: impl Into<SmolStr>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConsoleError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ConsoleError::Io(format!("invalid file name {}", path.display()).into()))?;
        let bytes = std::fs::read(path)
            .map_err(|err| ConsoleError::Io(format!("{}: {err}", path.display()).into()))?;
        Ok(Self::new(name, bytes))
    }
}

/// Lines of a fetched program and the next one to send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramExecution {
    lines: Vec<SmolStr>,
    cursor: usize,
}

impl ProgramExecution {
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: split_program_lines(text),
            cursor: 0,
        }
    }

    #[must_use]
    pub fn lines(&self) -> &[SmolStr] {
        &self.lines
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn current(&self) -> Option<&SmolStr> {
        self.lines.get(self.cursor)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.lines.len()
    }

    fn advance(&mut self) {
        self.cursor += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramReport {
    pub path: SmolStr,
    pub lines_sent: usize,
}

/// Split on any line-break style, trim, drop blank lines.
#[must_use]
pub fn split_program_lines(text: &str) -> Vec<SmolStr> {
    text.split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(SmolStr::new)
        .collect()
}

/// Strip a trailing `.ext` from the final path component, if any.
#[must_use]
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if dot + 1 < name.len() && !name[dot + 1..].contains('/') => &name[..dot],
        _ => name,
    }
}

/// Controller path of the job produced from an uploaded artifact.
#[must_use]
pub fn program_path(artifact_name: &str, config: &ProgramConfig) -> SmolStr {
    let base = strip_extension(artifact_name);
    if config.jobs_dir.is_empty() {
        SmolStr::new(format!("{base}.{}", config.extension))
    } else {
        SmolStr::new(format!("{}/{base}.{}", config.jobs_dir, config.extension))
    }
}

/// Re-resolve a non-program path to the program extension.
///
/// Returns the path to run and whether it was rewritten.
#[must_use]
pub fn resolve_run_path(path: &str, extension: &str) -> (SmolStr, bool) {
    let path = path.trim();
    let suffix = format!(".{extension}");
    let is_program = path.len() > suffix.len()
        && path
            .get(path.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(&suffix));
    if is_program {
        (SmolStr::new(path), false)
    } else {
        (
            SmolStr::new(format!("{}{suffix}", strip_extension(path))),
            true,
        )
    }
}

pub struct ProgramExecutor<T> {
    rpc: RpcClient<T>,
    state: StateStore,
    queue: CommandQueue,
    config: ProgramConfig,
    jobs: Arc<Mutex<Vec<SmolStr>>>,
}

impl<T: Transport> ProgramExecutor<T> {
    pub fn new(
        rpc: RpcClient<T>,
        state: StateStore,
        queue: CommandQueue,
        config: ProgramConfig,
    ) -> Self {
        Self {
            rpc,
            state,
            queue,
            config,
            jobs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Job paths registered by successful uploads, oldest first.
    #[must_use]
    pub fn jobs(&self) -> Vec<SmolStr> {
        self.jobs.lock().clone()
    }

    fn gate(&self) -> Result<(), ConsoleError> {
        let journal = self.rpc.journal();
        self.state.read(check_dispatch).map_err(|violation| {
            journal.error(format!("program blocked: {violation}"));
            ConsoleError::Interlock(violation)
        })
    }

    /// Upload, fetch and stream an artifact's program.
    pub async fn upload_and_run(&self, artifact: &Artifact) -> Result<ProgramReport, ConsoleError> {
        let path = self.upload(artifact).await?;
        let mut execution = self.fetch(&path).await?;
        self.execute(&path, &mut execution).await
    }

    /// Upload an artifact and register the job path derived from it.
    pub async fn upload(&self, artifact: &Artifact) -> Result<SmolStr, ConsoleError> {
        self.gate()?;
        let journal = self.rpc.journal();
        let endpoint = self.rpc.endpoint();
        journal.info(format!(
            "uploading {} to {}",
            artifact.name,
            endpoint.host()
        ));
        let request = HttpRequest::post(
            endpoint.upload_url(&artifact.name),
            &self.config.upload_content_type,
            artifact.bytes.clone(),
        );
        let reply = self.rpc.transport().send(request).await.map_err(|err| {
            journal.error(format!("upload of {} failed: {err}", artifact.name));
            ConsoleError::Upload(err.0)
        })?;
        if !reply.is_success() {
            let reason = format!("HTTP {}: {}", reply.status, reply.body.trim());
            journal.error(format!("upload of {} failed: {reason}", artifact.name));
            return Err(ConsoleError::Upload(reason.into()));
        }

        let path = program_path(&artifact.name, &self.config);
        self.jobs.lock().push(path.clone());
        journal.info(format!("upload complete: {path}"));
        Ok(path)
    }

    /// Fetch a job and split it into an execution.
    pub async fn fetch(&self, path: &str) -> Result<ProgramExecution, ConsoleError> {
        let journal = self.rpc.journal();
        let request = HttpRequest::get(self.rpc.endpoint().file_url(path));
        let reply = self.rpc.transport().send(request).await.map_err(|err| {
            journal.error(format!("could not read {path}: {err}"));
            ConsoleError::Transport(err.0)
        })?;
        if !reply.is_success() {
            journal.warn(format!("could not fetch {path}: HTTP {}", reply.status));
            return Err(ConsoleError::Protocol(
                format!("fetch {path}: HTTP {}", reply.status).into(),
            ));
        }
        let execution = ProgramExecution::from_text(&reply.body);
        debug!(path, lines = execution.lines().len(), "program fetched");
        Ok(execution)
    }

    /// Stream the remaining lines of `execution`, one acknowledged call at a time.
    pub async fn execute(
        &self,
        path: &str,
        execution: &mut ProgramExecution,
    ) -> Result<ProgramReport, ConsoleError> {
        let journal = self.rpc.journal();
        journal.info(format!("executing file: {path}"));
        let mut sent = 0;
        while let Some(line) = execution.current().cloned() {
            let line_no = execution.cursor() + 1;
            if let Err(violation) = self.state.read(check_dispatch) {
                journal.error(format!("program stopped before line {line_no}: {violation}"));
                return Err(ConsoleError::SequenceAbort {
                    line_no,
                    line,
                    reason: violation.to_string().into(),
                });
            }

            journal.info(format!("sending line: {line}"));
            self.queue.push(line.clone());
            if let Err(failure) = self
                .rpc
                .call(LINE_METHOD, json!({ "line": line.as_str() }), CallOptions::LOUD)
                .await
            {
                journal.error(format!("error sending line {line_no}: {line}"));
                return Err(ConsoleError::SequenceAbort {
                    line_no,
                    line,
                    reason: failure.to_string().into(),
                });
            }
            execution.advance();
            sent += 1;

            if !execution.is_finished() && !self.config.line_delay.is_zero() {
                tokio::time::sleep(self.config.line_delay).await;
            }
        }
        journal.info(format!("execution of {path} finished"));
        Ok(ProgramReport {
            path: SmolStr::new(path),
            lines_sent: sent,
        })
    }

    /// Ask the controller to run a stored file directly (single `runFile` call).
    pub async fn run_file(&self, path: &str) -> Result<SmolStr, ConsoleError> {
        self.gate()?;
        let journal = self.rpc.journal();
        let (resolved, rewritten) = resolve_run_path(path, &self.config.extension);
        if rewritten {
            journal.warn(format!(
                "{path} is not a program file; running {resolved} instead"
            ));
        }
        self.queue.push(format!("Run: {resolved}"));
        self.rpc
            .call(
                RUN_FILE_METHOD,
                json!({ "path": resolved.as_str() }),
                CallOptions::LOUD,
            )
            .await?;
        Ok(resolved)
    }
}
