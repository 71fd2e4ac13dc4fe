//! Console configuration loading.

#![allow(missing_docs)]

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::ConsoleError;

pub const DEFAULT_CONTROLLER_PORT: u16 = 8080;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(9000);
pub const DEFAULT_LINE_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_QUEUE_CAPACITY: usize = 15;
pub const DEFAULT_PROGRAM_EXTENSION: &str = "gcode";
pub const DEFAULT_JOBS_DIR: &str = "jobs";
pub const DEFAULT_UPLOAD_CONTENT_TYPE: &str = "text/csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub controller: ControllerConfig,
    pub poll_interval: Duration,
    pub queue_capacity: usize,
    pub log_level: SmolStr,
    pub program: ProgramConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Host the console itself is served from; resolved by [`resolve_controller_host`].
    pub host: SmolStr,
    pub port: u16,
    /// `None` means RPC calls never time out.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramConfig {
    pub extension: SmolStr,
    pub jobs_dir: SmolStr,
    pub line_delay: Duration,
    pub upload_content_type: SmolStr,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig {
                host: SmolStr::new_static("localhost"),
                port: DEFAULT_CONTROLLER_PORT,
                timeout: None,
            },
            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            log_level: SmolStr::new_static("info"),
            program: ProgramConfig {
                extension: SmolStr::new_static(DEFAULT_PROGRAM_EXTENSION),
                jobs_dir: SmolStr::new_static(DEFAULT_JOBS_DIR),
                line_delay: DEFAULT_LINE_DELAY,
                upload_content_type: SmolStr::new_static(DEFAULT_UPLOAD_CONTENT_TYPE),
            },
        }
    }
}

impl ConsoleConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConsoleError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|err| ConsoleError::InvalidConfig(format!("console.toml: {err}").into()))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConsoleError> {
        let raw: ConsoleToml = toml::from_str(text)
            .map_err(|err| ConsoleError::InvalidConfig(format!("console.toml: {err}").into()))?;
        raw.into_config()
    }
}

/// Map the console's own hostname to the controller host.
#[must_use]
pub fn resolve_controller_host(console_host: &str) -> SmolStr {
    let host = console_host.trim();
    if host.is_empty() || host == "localhost" || host == "127.0.0.1" {
        SmolStr::new_static("localhost")
    } else {
        SmolStr::new(host)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConsoleToml {
    controller: Option<ControllerSection>,
    console: Option<ConsoleSection>,
    program: Option<ProgramSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControllerSection {
    host: Option<String>,
    port: Option<u16>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConsoleSection {
    poll_interval_ms: Option<u64>,
    queue_capacity: Option<usize>,
    log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProgramSection {
    extension: Option<String>,
    jobs_dir: Option<String>,
    line_delay_ms: Option<u64>,
    upload_content_type: Option<String>,
}

impl ConsoleToml {
    fn into_config(self) -> Result<ConsoleConfig, ConsoleError> {
        let defaults = ConsoleConfig::default();
        let controller = self.controller.unwrap_or_default();
        let console = self.console.unwrap_or_default();
        let program = self.program.unwrap_or_default();

        let port = controller.port.unwrap_or(DEFAULT_CONTROLLER_PORT);
        if port == 0 {
            return Err(ConsoleError::InvalidConfig(
                "controller.port must be non-zero".into(),
            ));
        }
        let timeout = match controller.timeout_ms {
            Some(0) => {
                return Err(ConsoleError::InvalidConfig(
                    "controller.timeout_ms must be > 0 (omit it to disable timeouts)".into(),
                ))
            }
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        };
        let poll_interval = match console.poll_interval_ms {
            Some(0) => {
                return Err(ConsoleError::InvalidConfig(
                    "console.poll_interval_ms must be > 0".into(),
                ))
            }
            Some(ms) => Duration::from_millis(ms),
            None => defaults.poll_interval,
        };
        let queue_capacity = console.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(ConsoleError::InvalidConfig(
                "console.queue_capacity must be > 0".into(),
            ));
        }
        let extension = program
            .extension
            .map(|ext| ext.trim().trim_start_matches('.').to_string())
            .unwrap_or_else(|| DEFAULT_PROGRAM_EXTENSION.to_string());
        if extension.is_empty() || extension.contains('/') {
            return Err(ConsoleError::InvalidConfig(
                format!("invalid program.extension '{extension}'").into(),
            ));
        }
        let jobs_dir = program
            .jobs_dir
            .map(|dir| dir.trim().trim_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_JOBS_DIR.to_string());

        Ok(ConsoleConfig {
            controller: ControllerConfig {
                host: controller
                    .host
                    .map_or(defaults.controller.host, SmolStr::new),
                port,
                timeout,
            },
            poll_interval,
            queue_capacity,
            log_level: console.log_level.map_or(defaults.log_level, SmolStr::new),
            program: ProgramConfig {
                extension: SmolStr::new(extension),
                jobs_dir: SmolStr::new(jobs_dir),
                line_delay: program
                    .line_delay_ms
                    .map_or(DEFAULT_LINE_DELAY, Duration::from_millis),
                upload_content_type: program
                    .upload_content_type
                    .map_or(defaults.program.upload_content_type, SmolStr::new),
            },
        })
    }
}
