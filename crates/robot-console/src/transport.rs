//! HTTP transport seam below the RPC contract.

#![allow(missing_docs)]

use std::future::Future;
use std::time::Duration;

use smol_str::SmolStr;
use thiserror::Error;
use tracing::debug;

use crate::config::{resolve_controller_host, ConsoleConfig};
use crate::session::Session;

/// Response header the controller sets while it is shutting down.
pub const SERVER_CLOSING_HEADER: &str = "X-Server-Closing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub content_type: Option<SmolStr>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            content_type: None,
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn post(url: impl Into<String>, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            content_type: Some(SmolStr::new(content_type)),
            body: body.into(),
        }
    }

    /// Body as text (lossy), for logging and scripted replies.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    /// `X-Server-Closing: yes` was present.
    pub closing: bool,
    pub body: String,
}

impl HttpReply {
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            closing: false,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Connection-level failure (no HTTP reply at all).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub SmolStr);

/// Issues one HTTP exchange with the controller.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpReply, TransportError>> + Send;
}

/// Controller base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: SmolStr,
    port: u16,
}

impl Endpoint {
    #[must_use]
    pub fn new(host: impl Into<SmolStr>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Session `server_ip` wins over the configured console host.
    #[must_use]
    pub fn resolve(config: &ConsoleConfig, session: &Session) -> Self {
        let host = session
            .server_ip
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map_or_else(
                || resolve_controller_host(&config.controller.host),
                SmolStr::new,
            );
        Self::new(host, config.controller.port)
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn rpc_url(&self) -> String {
        format!("{}/", self.base_url())
    }

    #[must_use]
    pub fn upload_url(&self, file_name: &str) -> String {
        format!(
            "{}/upload?name={}",
            self.base_url(),
            urlencoding::encode(file_name)
        )
    }

    /// URL of a controller-relative file such as `jobs/part.gcode`.
    #[must_use]
    pub fn file_url(&self, path: &str) -> String {
        let encoded = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{encoded}", self.base_url())
    }
}

/// Blocking `ureq` agent driven from the tokio blocking pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    /// `timeout = None` keeps the controller contract: calls never time out.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpReply, TransportError>> + Send {
        let agent = self.agent.clone();
        async move {
            tokio::task::spawn_blocking(move || blocking_send(&agent, request))
                .await
                .map_err(|err| TransportError(format!("request task: {err}").into()))?
        }
    }
}

fn blocking_send(agent: &ureq::Agent, request: HttpRequest) -> Result<HttpReply, TransportError> {
    debug!(url = %request.url, method = ?request.method, "http request");
    let result = match request.method {
        HttpMethod::Get => agent.get(request.url.as_str()).call(),
        HttpMethod::Post => {
            let mut builder = agent.post(request.url.as_str());
            if let Some(content_type) = request.content_type.as_deref() {
                builder = builder.header("Content-Type", content_type);
            }
            builder.send(request.body.as_slice())
        }
    };
    let mut response = result.map_err(|err| TransportError(err.to_string().into()))?;
    let status = response.status().as_u16();
    let closing = response
        .headers()
        .get(SERVER_CLOSING_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("yes"));
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|err| TransportError(format!("read body: {err}").into()))?;
    Ok(HttpReply {
        status,
        closing,
        body,
    })
}
