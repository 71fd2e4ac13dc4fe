//! Scripted controller used by tests and `--dry-run`.
//!
//! [`ScriptedTransport`] speaks the controller's HTTP surface in memory. RPC
//! calls are decoded the way the controller decodes them, recorded, and
//! answered from (in order) a one-shot reply queue for the method, a sticky
//! reply for the method, or a small simulated device that tracks relays,
//! mode, position and the emergency flag. Uploads and job fetches are
//! served from in-memory maps.
//!
//! A method can be held: requests for it are answered only after the
//! [`Hold`] is released, which lets tests order a poll and a toggle
//! deterministically.

#![allow(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use smol_str::SmolStr;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::rpc::envelope::{decode_method_call, render_fault, render_struct_response, MethodCall};
use crate::snapshot::{PositionMode, Snapshot};
use crate::state::Position;
use crate::transport::{HttpMethod, HttpReply, HttpRequest, Transport, TransportError};

/// One canned answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// HTTP 200 with this body.
    Body(String),
    Status(u16, String),
    /// HTTP 200 with `X-Server-Closing: yes`.
    Closing,
    /// No HTTP reply at all.
    Unreachable(String),
}

impl ScriptedReply {
    #[must_use]
    pub fn ok() -> Self {
        Self::members(&[("status", "ok")])
    }

    #[must_use]
    pub fn members(members: &[(&str, &str)]) -> Self {
        Self::Body(render_struct_response(members))
    }

    #[must_use]
    pub fn fault(message: &str) -> Self {
        Self::Body(render_fault(message))
    }

    /// A `getEstado` document for `snapshot`.
    #[must_use]
    pub fn state(snapshot: &Snapshot) -> Self {
        Self::Body(render_state_document(snapshot))
    }

    fn into_result(self) -> Result<HttpReply, TransportError> {
        match self {
            Self::Body(body) => Ok(HttpReply::ok(body)),
            Self::Status(status, body) => Ok(HttpReply {
                status,
                closing: false,
                body,
            }),
            Self::Closing => Ok(HttpReply {
                status: 200,
                closing: true,
                body: String::new(),
            }),
            Self::Unreachable(reason) => Err(TransportError(reason.into())),
        }
    }
}

/// Render a state document the way the controller does.
#[must_use]
pub fn render_state_document(snapshot: &Snapshot) -> String {
    let on_off = |on: bool| if on { "ON" } else { "OFF" };
    let x = format!("{:.3}", snapshot.position.x);
    let y = format!("{:.3}", snapshot.position.y);
    let z = format!("{:.3}", snapshot.position.z);
    render_struct_response(&[
        ("x", &x),
        ("y", &y),
        ("z", &z),
        ("modo", snapshot.mode.as_str()),
        ("motores", on_off(snapshot.motors)),
        ("garra", on_off(snapshot.gripper)),
        ("emergencia", if snapshot.emergency { "SI" } else { "NO" }),
        ("remoto", on_off(snapshot.remote)),
    ])
}

/// File received on the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub name: SmolStr,
    pub content_type: Option<SmolStr>,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct Script {
    device: Snapshot,
    requests: Vec<HttpRequest>,
    calls: Vec<MethodCall>,
    arrivals: Vec<(SmolStr, Instant)>,
    queued: HashMap<SmolStr, VecDeque<ScriptedReply>>,
    sticky: HashMap<SmolStr, ScriptedReply>,
    files: HashMap<String, ScriptedReply>,
    uploads: Vec<Upload>,
    upload_reply: ScriptedReply,
    holds: HashMap<SmolStr, Arc<Semaphore>>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            device: Snapshot {
                remote: true,
                ..Snapshot::default()
            },
            requests: Vec::new(),
            calls: Vec::new(),
            arrivals: Vec::new(),
            queued: HashMap::new(),
            sticky: HashMap::new(),
            files: HashMap::new(),
            uploads: Vec::new(),
            upload_reply: ScriptedReply::Body("ok".into()),
            holds: HashMap::new(),
        }
    }
}

impl Script {
    fn respond(&mut self, request: HttpRequest) -> (ScriptedReply, Option<Arc<Semaphore>>) {
        self.requests.push(request.clone());
        let path = request_path(&request.url);
        match request.method {
            HttpMethod::Post if path.is_empty() => self.respond_rpc(&request),
            HttpMethod::Post => match path.strip_prefix("upload?name=") {
                Some(name) => {
                    let name = urlencoding::decode(name)
                        .map_or_else(|_| SmolStr::new(name), |name| SmolStr::new(name.as_ref()));
                    self.uploads.push(Upload {
                        name,
                        content_type: request.content_type.clone(),
                        bytes: request.body.clone(),
                    });
                    (self.upload_reply.clone(), None)
                }
                None => (ScriptedReply::Status(404, "not found".into()), None),
            },
            HttpMethod::Get => {
                let path = urlencoding::decode(&path)
                    .map_or_else(|_| path.clone(), |path| path.into_owned());
                let reply = self
                    .files
                    .get(&path)
                    .cloned()
                    .unwrap_or_else(|| ScriptedReply::Status(404, "not found".into()));
                (reply, None)
            }
        }
    }

    fn respond_rpc(&mut self, request: &HttpRequest) -> (ScriptedReply, Option<Arc<Semaphore>>) {
        let Some(call) = decode_method_call(&request.body_text()) else {
            return (ScriptedReply::fault("malformed request"), None);
        };
        self.calls.push(call.clone());
        self.arrivals.push((call.method.clone(), Instant::now()));
        let hold = self.holds.get(&call.method).cloned();
        let reply = match self
            .queued
            .get_mut(&call.method)
            .and_then(VecDeque::pop_front)
        {
            Some(reply) => reply,
            None => match self.sticky.get(&call.method) {
                Some(reply) => reply.clone(),
                None => self.simulate(&call),
            },
        };
        (reply, hold)
    }

    fn simulate(&mut self, call: &MethodCall) -> ScriptedReply {
        let flag = |name: &str| call.params.get(name).and_then(Value::as_bool).unwrap_or(false);
        let number = |name: &str, fallback: f64| {
            call.params
                .get(name)
                .and_then(Value::as_f64)
                .unwrap_or(fallback)
        };
        let device = &mut self.device;
        match call.method.as_str() {
            "getEstado" => return ScriptedReply::state(device),
            "motors" => device.motors = flag("on"),
            "gripper" => device.gripper = flag("on"),
            "enableRemote" => device.remote = true,
            "disableRemote" => device.remote = false,
            "setAbs" => device.mode = PositionMode::Absolute,
            "setRel" => device.mode = PositionMode::Relative,
            "emergencyStop" => {
                device.emergency = true;
                device.motors = false;
                device.gripper = false;
            }
            "resetEmergency" => device.emergency = false,
            "move" => {
                let current = device.position;
                let target = Position::new(
                    number("x", current.x),
                    number("y", current.y),
                    number("z", current.z),
                );
                device.position = if device.mode == PositionMode::Absolute {
                    target
                } else {
                    Position::new(
                        current.x + target.x,
                        current.y + target.y,
                        current.z + target.z,
                    )
                };
            }
            _ => {}
        }
        ScriptedReply::ok()
    }
}

/// Path and query after `http://host:port/`.
fn request_path(url: &str) -> String {
    url.splitn(4, '/').nth(3).unwrap_or_default().to_string()
}

/// In-memory controller implementing [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the simulated device (what `getEstado` reports by default).
    pub fn set_device(&self, snapshot: Snapshot) {
        self.script.lock().device = snapshot;
    }

    #[must_use]
    pub fn device(&self) -> Snapshot {
        self.script.lock().device
    }

    /// Answer the next call of `method` with `reply`, once.
    pub fn push_reply(&self, method: &str, reply: ScriptedReply) {
        self.script
            .lock()
            .queued
            .entry(SmolStr::new(method))
            .or_default()
            .push_back(reply);
    }

    /// Answer every call of `method` with `reply` once the one-shot queue is empty.
    pub fn set_reply(&self, method: &str, reply: ScriptedReply) {
        self.script.lock().sticky.insert(SmolStr::new(method), reply);
    }

    pub fn clear_reply(&self, method: &str) {
        self.script.lock().sticky.remove(method);
    }

    /// Serve `contents` on `GET /<path>`.
    pub fn serve_file(&self, path: &str, contents: &str) {
        self.script
            .lock()
            .files
            .insert(path.trim_start_matches('/').to_string(), ScriptedReply::Body(contents.into()));
    }

    pub fn set_upload_reply(&self, reply: ScriptedReply) {
        self.script.lock().upload_reply = reply;
    }

    /// Delay replies to `method` until the returned hold is released.
    #[must_use]
    pub fn hold(&self, method: &str) -> Hold {
        let gate = Arc::new(Semaphore::new(0));
        self.script
            .lock()
            .holds
            .insert(SmolStr::new(method), Arc::clone(&gate));
        Hold {
            script: Arc::clone(&self.script),
            method: SmolStr::new(method),
            gate,
        }
    }

    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.script.lock().requests.clone()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<MethodCall> {
        self.script.lock().calls.clone()
    }

    #[must_use]
    pub fn methods(&self) -> Vec<SmolStr> {
        self.script
            .lock()
            .calls
            .iter()
            .map(|call| call.method.clone())
            .collect()
    }

    #[must_use]
    pub fn calls_for(&self, method: &str) -> Vec<MethodCall> {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    /// When each call to `method` reached the controller, on the tokio clock.
    #[must_use]
    pub fn call_instants(&self, method: &str) -> Vec<Instant> {
        self.script
            .lock()
            .arrivals
            .iter()
            .filter(|(name, _)| name == method)
            .map(|(_, at)| *at)
            .collect()
    }

    #[must_use]
    pub fn uploads(&self) -> Vec<Upload> {
        self.script.lock().uploads.clone()
    }

    /// Wait (up to five seconds) until `method` was called `count` times.
    pub async fn wait_for_calls(&self, method: &str, count: usize) -> bool {
        for _ in 0..5000 {
            if self.calls_for(method).len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        false
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpReply, TransportError>> + Send {
        let script = Arc::clone(&self.script);
        async move {
            let (reply, hold) = script.lock().respond(request);
            if let Some(gate) = hold {
                // Closed on release; acquire then fails and the reply goes out.
                let _ = gate.acquire().await;
            }
            reply.into_result()
        }
    }
}

/// Pending hold on one RPC method.
#[derive(Debug)]
pub struct Hold {
    script: Arc<Mutex<Script>>,
    method: SmolStr,
    gate: Arc<Semaphore>,
}

impl Hold {
    /// Let every waiting and future call of the method through.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Hold {
    fn drop(&mut self) {
        self.script.lock().holds.remove(&self.method);
        self.gate.close();
    }
}
