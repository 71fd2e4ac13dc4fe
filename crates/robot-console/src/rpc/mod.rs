//! RPC client: one call per method, credentials injected, failures normalized.

#![allow(missing_docs)]

pub mod envelope;

use std::sync::Arc;

use serde_json::{Map, Value};
use smol_str::SmolStr;
use thiserror::Error;
use tracing::debug;

use crate::journal::Journal;
use crate::session::Session;
use crate::transport::{Endpoint, HttpRequest, Transport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Suppress operator-log lines; success/failure semantics are unchanged.
    pub silent: bool,
}

impl CallOptions {
    pub const LOUD: Self = Self { silent: false };
    pub const SILENT: Self = Self { silent: true };
}

/// The single failure signal at the RPC boundary.
///
/// Callers treat every variant the same way; the distinction only feeds
/// the operator log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcFailure {
    #[error("{0}")]
    Transport(SmolStr),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: SmolStr },
    #[error("controller fault: {0}")]
    Fault(SmolStr),
    #[error("controller is shutting down")]
    ServerClosing,
}

pub struct RpcClient<T> {
    transport: Arc<T>,
    endpoint: Endpoint,
    session: Session,
    journal: Journal,
}

impl<T> Clone for RpcClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            endpoint: self.endpoint.clone(),
            session: self.session.clone(),
            journal: self.journal.clone(),
        }
    }
}

impl<T: Transport> RpcClient<T> {
    pub fn new(transport: Arc<T>, endpoint: Endpoint, session: Session, journal: Journal) -> Self {
        Self {
            transport,
            endpoint,
            session,
            journal,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Issue `method` with `params` and return the raw reply body.
    ///
    /// `params` objects are extended with the session `token`/`user`;
    /// `null` is treated as `{}` and any other value is wrapped as
    /// `{"value": ...}`. There is no retry and no timeout beyond what the
    /// transport was built with.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        options: CallOptions,
    ) -> Result<String, RpcFailure> {
        let mut params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        self.session.inject(&mut params);
        let body = envelope::encode_method_call(method, &Value::Object(params));

        if !options.silent {
            self.journal.info(format!("sending: {method}"));
        }
        debug!(method, silent = options.silent, "rpc call");
        let result = self.dispatch(body).await;
        match &result {
            Ok(_) if !options.silent => self.journal.info(format!("{method} executed")),
            Err(err) if !options.silent => self.journal.error(format!("{method} failed: {err}")),
            Ok(_) => {}
            Err(err) => debug!(method, %err, "silent rpc call failed"),
        }
        result
    }

    async fn dispatch(&self, body: String) -> Result<String, RpcFailure> {
        let request = HttpRequest::post(self.endpoint.rpc_url(), envelope::RPC_CONTENT_TYPE, body);
        let reply = self
            .transport
            .send(request)
            .await
            .map_err(|err| RpcFailure::Transport(err.0))?;
        if reply.closing {
            return Err(RpcFailure::ServerClosing);
        }
        if !reply.is_success() {
            return Err(RpcFailure::Status {
                status: reply.status,
                body: SmolStr::new(reply.body.trim()),
            });
        }
        if envelope::is_fault(&reply.body) {
            return Err(RpcFailure::Fault(SmolStr::new(reply.body.trim())));
        }
        Ok(reply.body)
    }
}
