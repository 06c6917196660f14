//! One debug session: a DAP client on one side, one script runtime on the
//! other.
//!
//! A session is a single task. Client frames, inspector notifications and
//! subprocess events are merged by one `select!` loop and handled strictly in
//! arrival order, so handlers never race each other and state needs no locks.
//! Handlers may await inspector calls; events that arrive meanwhile queue up
//! and are handled after the current handler (and its response) completes.

mod events;
mod launch;
mod refs;
mod requests;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ferry_config::FerryConfig;
use ferry_inspector::{InspectorClient, InspectorClientConfig, InspectorEvent};
use ferry_process::{ProcessEvent, RuntimeProcess, SandboxSpec};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dap::{decode_request, Event, FrameError, ProtocolMessage, Request, Response};
use crate::deps::DependencyPreparer;
use crate::error::RequestError;
use crate::remote::CallFrame;
use crate::sourcemap::LineMapping;
use crate::token::TokenVerifier;

pub use refs::{ScopeRef, VariableStore};

/// The only thread a script runtime exposes.
pub const THREAD_ID: i64 = 1;

/// Child `PATH` when the service itself has none.
const DEFAULT_CHILD_PATH: &str = "/usr/bin:/bin";

/// Output events held back while a step is in progress.
const DEFAULT_OUTPUT_BUFFER_LIMIT: usize = 10_000;

/// Everything a session needs from the service configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub runtime_path: PathBuf,
    pub inspect_host: String,
    pub discovery_timeout: Duration,
    pub inspector: InspectorClientConfig,
    pub sandbox: Option<SandboxSpec>,
    pub dependencies: Option<DependencyPreparer>,
    /// Exported to scripts as `WM_BASE_URL`.
    pub base_internal_url: Option<String>,
    pub child_path: String,
    pub child_home: Option<String>,
    pub output_buffer_limit: usize,
    pub verifier: Arc<TokenVerifier>,
}

impl SessionConfig {
    pub fn new(runtime_path: impl Into<PathBuf>, verifier: Arc<TokenVerifier>) -> Self {
        Self {
            runtime_path: runtime_path.into(),
            inspect_host: "127.0.0.1".to_owned(),
            discovery_timeout: Duration::from_secs(10),
            inspector: InspectorClientConfig::default(),
            sandbox: None,
            dependencies: None,
            base_internal_url: None,
            child_path: DEFAULT_CHILD_PATH.to_owned(),
            child_home: None,
            output_buffer_limit: DEFAULT_OUTPUT_BUFFER_LIMIT,
            verifier,
        }
    }

    pub fn from_config(config: &FerryConfig, verifier: Arc<TokenVerifier>) -> Self {
        let sandbox = config.sandbox.enabled.then(|| SandboxSpec {
            binary: config.sandbox.binary_path.clone(),
            config_path: config.sandbox.config_path.clone(),
            extra_args: config.sandbox.extra_args.clone(),
        });
        let dependencies = config
            .dependencies
            .prepare_binary
            .as_ref()
            .map(|binary| DependencyPreparer::new(binary, config.dependencies.timeout()));

        Self {
            inspect_host: config.runtime.inspect_host.clone(),
            discovery_timeout: config.runtime.discovery_timeout(),
            inspector: InspectorClientConfig {
                call_timeout: config.runtime.call_timeout(),
                connect_timeout: config.runtime.connect_timeout(),
            },
            sandbox,
            dependencies,
            base_internal_url: config.auth.base_internal_url.clone(),
            child_path: std::env::var("PATH").unwrap_or_else(|_| DEFAULT_CHILD_PATH.to_owned()),
            child_home: std::env::var("HOME").ok(),
            ..Self::new(config.runtime.path.clone(), verifier)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initializing,
    Configuring,
    Launching,
    Running,
    Paused,
    Terminated,
}

/// Whether the session loop keeps going after a client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The launched runtime and the resources tied to it.
struct ActiveRuntime {
    inspector: InspectorClient,
    process: RuntimeProcess,
    /// Breakpoints are set by URL pattern on this path.
    url_regex: String,
    /// Absolute path of the user's script as handed to the runtime.
    script_path: String,
    /// Removed when the runtime is torn down.
    workdir: Option<TempDir>,
}

impl ActiveRuntime {
    /// Whether a parsed script URL names the launched script. Runtimes report
    /// either the bare path or its `file://` URL.
    fn is_script(&self, url: &str) -> bool {
        url == self.script_path || url.strip_prefix("file://") == Some(self.script_path.as_str())
    }
}

pub struct DebugSession {
    config: Arc<SessionConfig>,
    out: mpsc::UnboundedSender<ProtocolMessage>,
    seq: u64,
    state: SessionState,

    launched: bool,
    configuration_done: bool,
    stepping: bool,
    /// The runtime starts on an injected `debugger;` at line 0.
    entry_pause: bool,
    initial_pause_done: bool,
    /// Swallow the `Debugger.resumed` caused by leaving the entry pause.
    suppress_resumed: bool,
    terminated_sent: bool,
    /// Client line minus this is the 0-based line of the file on disk.
    line_shift: u32,

    /// Requested breakpoint lines per client source path.
    breakpoints: BTreeMap<String, Vec<u32>>,
    installed_breakpoints: Vec<String>,
    next_breakpoint_id: i64,

    /// Parsed scripts: id to URL.
    scripts: HashMap<String, String>,
    main_script_id: Option<String>,
    mapping: LineMapping,
    call_frames: Vec<CallFrame>,
    refs: VariableStore,

    pending_output: VecDeque<Value>,
    dropped_output: usize,
    result: Option<Value>,

    runtime: Option<ActiveRuntime>,
    inspector_events: Option<mpsc::UnboundedReceiver<InspectorEvent>>,
    process_events: Option<mpsc::UnboundedReceiver<ProcessEvent>>,
}

enum Input {
    Client(String),
    ClientGone,
    Shutdown,
    Inspector(Option<InspectorEvent>),
    Process(Option<ProcessEvent>),
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl DebugSession {
    pub fn new(config: Arc<SessionConfig>, out: mpsc::UnboundedSender<ProtocolMessage>) -> Self {
        Self {
            config,
            out,
            seq: 1,
            state: SessionState::Created,
            launched: false,
            configuration_done: false,
            stepping: false,
            entry_pause: false,
            initial_pause_done: false,
            suppress_resumed: false,
            terminated_sent: false,
            line_shift: 0,
            breakpoints: BTreeMap::new(),
            installed_breakpoints: Vec::new(),
            next_breakpoint_id: 1,
            scripts: HashMap::new(),
            main_script_id: None,
            mapping: LineMapping::default(),
            call_frames: Vec::new(),
            refs: VariableStore::new(),
            pending_output: VecDeque::new(),
            dropped_output: 0,
            result: None,
            runtime: None,
            inspector_events: None,
            process_events: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the client leaves, sends `disconnect`, or
    /// `shutdown` fires. Runtime resources are always released on return.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<String>,
        shutdown: CancellationToken,
    ) {
        tracing::debug!(target: "ferry.dap", "session started");
        loop {
            let input = tokio::select! {
                _ = shutdown.cancelled() => Input::Shutdown,
                frame = inbound.recv() => match frame {
                    Some(text) => Input::Client(text),
                    None => Input::ClientGone,
                },
                event = recv_or_pending(&mut self.inspector_events) => Input::Inspector(event),
                event = recv_or_pending(&mut self.process_events) => Input::Process(event),
            };

            match input {
                Input::Client(text) => {
                    if self.handle_frame(&text).await == Flow::Stop {
                        break;
                    }
                }
                Input::ClientGone => {
                    tracing::info!(target: "ferry.dap", "client disconnected");
                    break;
                }
                Input::Shutdown => {
                    tracing::info!(target: "ferry.dap", "session shutting down");
                    if self.launched {
                        self.teardown();
                        self.send_terminated();
                    }
                    break;
                }
                Input::Inspector(Some(event)) => self.handle_inspector_event(event).await,
                Input::Inspector(None) => self.inspector_events = None,
                Input::Process(Some(event)) => self.handle_process_event(event),
                Input::Process(None) => self.process_events = None,
            }
        }
        self.teardown();
        tracing::debug!(target: "ferry.dap", "session ended");
    }

    async fn handle_frame(&mut self, text: &str) -> Flow {
        match decode_request(text) {
            Ok(request) => self.handle_request(request).await,
            Err(FrameError::Malformed {
                seq: Some(request_seq),
                command,
                message,
            }) => {
                tracing::warn!(target: "ferry.dap", request_seq, %message, "malformed request");
                let seq = self.next_seq();
                self.send(ProtocolMessage::Response(Response::failure(
                    seq,
                    request_seq,
                    command.unwrap_or_else(|| "unknown".to_owned()),
                    message,
                )));
                Flow::Continue
            }
            Err(err) => {
                tracing::warn!(target: "ferry.dap", error = %err, "dropping client frame");
                Flow::Continue
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn send(&self, message: ProtocolMessage) {
        if self.out.send(message).is_err() {
            tracing::trace!(target: "ferry.dap", "client channel closed; dropping message");
        }
    }

    fn respond(&mut self, request: &Request, body: Option<Value>) {
        let seq = self.next_seq();
        self.send(ProtocolMessage::Response(Response::success(seq, request, body)));
    }

    fn respond_error(&mut self, request: &Request, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(target: "ferry.dap", command = %request.command, %message, "request failed");
        let seq = self.next_seq();
        self.send(ProtocolMessage::Response(Response::error(seq, request, message)));
    }

    fn send_event(&mut self, event: &str, body: Option<Value>) {
        let seq = self.next_seq();
        self.send(ProtocolMessage::Event(Event::new(seq, event, body)));
    }

    /// Send an `output` event, or hold it back while stepping.
    fn emit_output(&mut self, body: Value) {
        if !self.stepping {
            self.send_event("output", Some(body));
            return;
        }
        if self.pending_output.len() >= self.config.output_buffer_limit {
            self.pending_output.pop_front();
            self.dropped_output += 1;
        }
        self.pending_output.push_back(body);
    }

    fn flush_output(&mut self) {
        if self.dropped_output > 0 {
            tracing::warn!(
                target: "ferry.dap",
                dropped = self.dropped_output,
                "output buffer overflowed while stepping"
            );
            self.dropped_output = 0;
        }
        while let Some(body) = self.pending_output.pop_front() {
            self.send_event("output", Some(body));
        }
    }

    /// Send `terminated` once per session, after any held-back output.
    fn send_terminated(&mut self) {
        if self.terminated_sent {
            return;
        }
        self.terminated_sent = true;
        self.stepping = false;
        self.flush_output();
        self.state = SessionState::Terminated;
        let body = self
            .result
            .as_ref()
            .map(|result| serde_json::json!({ "result": result }));
        self.send_event("terminated", body);
    }

    /// Release the runtime. Safe to call any number of times.
    fn teardown(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        tracing::debug!(target: "ferry.dap", pid = ?runtime.process.pid(), "tearing down runtime");
        runtime.inspector.shutdown();
        runtime.process.kill();
        if let Some(workdir) = runtime.workdir {
            let path = workdir.path().to_path_buf();
            if let Err(err) = workdir.close() {
                tracing::warn!(target: "ferry.dap", path = %path.display(), error = %err, "failed to remove script directory");
            }
        }
        self.call_frames.clear();
        self.refs.clear();
    }

    fn inspector(&self) -> Result<InspectorClient, RequestError> {
        match &self.runtime {
            Some(runtime) => Ok(runtime.inspector.clone()),
            None if self.launched => Err(RequestError::NotRunning),
            None => Err(RequestError::NotLaunched),
        }
    }

    /// 0-based line in the running (transpiled) code for a client line.
    fn runtime_line(&self, client_line: u32) -> u32 {
        self.mapping
            .to_transpiled(client_line.saturating_sub(self.line_shift))
    }

    /// Client line for a 0-based line reported by the runtime.
    fn client_line(&self, runtime_line: u32) -> u32 {
        self.mapping.to_original(runtime_line) + self.line_shift
    }
}

/// Channels of a session running on its own task.
pub struct SessionHandle {
    /// Raw client text frames in.
    pub inbound: mpsc::UnboundedSender<String>,
    /// Protocol messages out, in send order.
    pub outbound: mpsc::UnboundedReceiver<ProtocolMessage>,
    pub task: JoinHandle<()>,
}

pub fn spawn_session(config: Arc<SessionConfig>, shutdown: CancellationToken) -> SessionHandle {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let session = DebugSession::new(config, outbound_tx);
    let task = tokio::spawn(session.run(inbound_rx, shutdown));
    SessionHandle {
        inbound: inbound_tx,
        outbound: outbound_rx,
        task,
    }
}
