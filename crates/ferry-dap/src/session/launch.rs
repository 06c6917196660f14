use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ferry_inspector::{InspectorClient, InspectorError};
use ferry_process::{LaunchSpec, RuntimeProcess};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{ActiveRuntime, DebugSession, SessionState};
use crate::dap::codec::describe_json_error;
use crate::dap::Request;
use crate::deps::PrepareOutcome;
use crate::error::{LaunchError, RequestError};
use crate::script::{PreparedScript, SCRIPT_FILE_NAME};

const SCRIPT_DIR_PREFIX: &str = "ferry_debug_";
const DEPS_LANGUAGE: &str = "bun";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LaunchArguments {
    program: Option<String>,
    code: Option<String>,
    cwd: Option<String>,
    args: Map<String, Value>,
    env: BTreeMap<String, Value>,
    call_main: bool,
    token: Option<String>,
}

/// What the runtime will execute.
#[derive(Clone, Copy)]
enum Target<'a> {
    Code(&'a str),
    Program(&'a str),
}

impl DebugSession {
    pub(super) async fn launch(&mut self, request: &Request) {
        if self.launched {
            self.respond_error(request, RequestError::AlreadyLaunched.to_string());
            return;
        }
        let args: LaunchArguments = match request.arguments() {
            Ok(args) => args,
            Err(err) => {
                let err = RequestError::InvalidArguments {
                    command: "launch",
                    message: describe_json_error(&err),
                };
                self.respond_error(request, err.to_string());
                return;
            }
        };

        let target = match (
            args.code.as_deref().filter(|code| !code.is_empty()),
            args.program.as_deref().filter(|program| !program.is_empty()),
        ) {
            (Some(code), _) => Target::Code(code),
            (None, Some(program)) => Target::Program(program),
            (None, None) => {
                self.respond_error(request, LaunchError::NothingToRun.to_string());
                return;
            }
        };

        if let Target::Code(code) = target {
            let verifier = self.config.verifier.clone();
            if let Err(err) = verifier.authorize_launch(args.token.as_deref(), code).await {
                tracing::warn!(target: "ferry.dap", error = %err, "launch rejected");
                self.respond_error(request, err.to_string());
                return;
            }
        }

        self.launched = true;
        self.state = SessionState::Launching;
        match self.start_runtime(&args, target).await {
            Ok(()) => {
                self.state = SessionState::Running;
                self.respond(request, None);
            }
            Err(err) => {
                tracing::error!(target: "ferry.dap", error = %err, "launch failed");
                let message = err.to_string();
                self.emit_output(json!({"category": "stderr", "output": format!("{message}\n")}));
                self.respond_error(request, message);
                self.teardown();
                self.send_terminated();
            }
        }
    }

    fn child_env(&self, client_env: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PATH".to_owned(), self.config.child_path.clone());
        if let Some(home) = &self.config.child_home {
            env.insert("HOME".to_owned(), home.clone());
        }
        for (name, value) in client_env {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            env.insert(name.clone(), value);
        }
        if let Some(url) = &self.config.base_internal_url {
            env.insert("WM_BASE_URL".to_owned(), url.clone());
        }
        env
    }

    async fn start_runtime(
        &mut self,
        args: &LaunchArguments,
        target: Target<'_>,
    ) -> Result<(), LaunchError> {
        let mut env = self.child_env(&args.env);

        let (script, workdir) = match target {
            Target::Code(code) => {
                let workdir = tempfile::Builder::new()
                    .prefix(SCRIPT_DIR_PREFIX)
                    .tempdir()?;
                if let Some(node_modules) = self.prepare_dependencies(code, workdir.path()).await {
                    link_node_modules(&node_modules, workdir.path()).await;
                    env.insert("NODE_PATH".to_owned(), node_modules.display().to_string());
                }
                let prepared = PreparedScript::new(code, args.call_main, &args.args);
                let script = workdir.path().join(SCRIPT_FILE_NAME);
                tokio::fs::write(&script, prepared.source).await?;
                self.entry_pause = true;
                self.line_shift = 0;
                (script, Some(workdir))
            }
            Target::Program(program) => {
                self.entry_pause = false;
                self.line_shift = 1;
                (std::path::absolute(program).map_err(LaunchError::Path)?, None)
            }
        };

        let cwd = match &args.cwd {
            Some(cwd) if !cwd.is_empty() => PathBuf::from(cwd),
            _ => std::env::current_dir().map_err(LaunchError::Path)?,
        };

        let mut spec = LaunchSpec::new(&self.config.runtime_path, &script, cwd);
        spec.env = env;
        spec.inspect_host = self.config.inspect_host.clone();
        spec.sandbox = self.config.sandbox.clone();
        spec.discovery_timeout = self.config.discovery_timeout;

        let (process, process_events) = RuntimeProcess::start(&spec).await?;
        tracing::info!(
            target: "ferry.dap",
            pid = ?process.pid(),
            url = process.inspector_url(),
            "runtime started"
        );
        let (inspector, inspector_events) =
            InspectorClient::connect_with_config(process.inspector_url(), self.config.inspector.clone())
                .await
                .map_err(LaunchError::Connect)?;

        let script_path = script.display().to_string();
        self.runtime = Some(ActiveRuntime {
            inspector,
            process,
            url_regex: regex::escape(&script_path),
            script_path,
            workdir,
        });
        self.inspector_events = Some(inspector_events);
        self.process_events = Some(process_events);

        self.prime().await.map_err(LaunchError::Prime)
    }

    /// Run the dependency tool and report its outcome to the client.
    async fn prepare_dependencies(&mut self, code: &str, cwd: &Path) -> Option<PathBuf> {
        let preparer = self.config.dependencies.clone()?;
        match preparer.prepare(code, DEPS_LANGUAGE, cwd).await {
            PrepareOutcome::Installed { node_modules } => {
                self.emit_output(json!({
                    "category": "console",
                    "output": format!("Dependencies installed at: {}\n", node_modules.display()),
                }));
                Some(node_modules)
            }
            PrepareOutcome::NothingToInstall => None,
            PrepareOutcome::Failed(error) => {
                tracing::warn!(target: "ferry.dap", %error, "dependency preparation failed");
                self.emit_output(json!({
                    "category": "console",
                    "output": format!("Warning: Failed to prepare dependencies: {error}\n"),
                }));
                None
            }
        }
    }

    /// Configure the freshly connected debugger, install breakpoints and let
    /// the runtime start executing.
    async fn prime(&mut self) -> Result<(), InspectorError> {
        let inspector = match self.inspector() {
            Ok(inspector) => inspector,
            Err(_) => return Err(InspectorError::ConnectionClosed),
        };

        // Domains some runtimes lack; a remote error there is not fatal.
        let optional = ["Inspector.enable", "Console.enable"];
        let steps = [
            ("Inspector.enable", json!({})),
            ("Console.enable", json!({})),
            ("Debugger.enable", json!({})),
            ("Runtime.enable", json!({})),
            ("Debugger.setBreakpointsActive", json!({"active": true})),
            ("Debugger.setPauseOnDebuggerStatements", json!({"enabled": true})),
            ("Debugger.setPauseOnExceptions", json!({"state": "uncaught"})),
        ];
        for (method, params) in steps {
            match inspector.call(method, params).await {
                Ok(_) => {}
                Err(InspectorError::Remote { message, .. }) if optional.contains(&method) => {
                    tracing::debug!(target: "ferry.inspector", method, %message, "optional domain unavailable");
                }
                Err(err) => return Err(err),
            }
        }

        self.apply_breakpoints().await;

        match inspector.call("Inspector.initialized", json!({})).await {
            Ok(_) => Ok(()),
            Err(InspectorError::Remote { message, .. }) => {
                tracing::debug!(target: "ferry.inspector", %message, "Inspector.initialized unsupported");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Replace every installed breakpoint with the current table.
    pub(super) async fn apply_breakpoints(&mut self) {
        let Some(runtime) = &self.runtime else {
            return;
        };
        let inspector = runtime.inspector.clone();
        let url_regex = runtime.url_regex.clone();

        for id in std::mem::take(&mut self.installed_breakpoints) {
            if let Err(err) = inspector
                .call("Debugger.removeBreakpoint", json!({"breakpointId": id}))
                .await
            {
                tracing::debug!(target: "ferry.dap", breakpoint = %id, error = %err, "failed to remove breakpoint");
            }
        }

        let mut lines: Vec<u32> = self.breakpoints.values().flatten().copied().collect();
        lines.sort_unstable();
        lines.dedup();

        for line in lines {
            let target = self.runtime_line(line);
            let params = json!({"lineNumber": target, "urlRegex": url_regex, "columnNumber": 0});
            match inspector.call("Debugger.setBreakpointByUrl", params).await {
                Ok(result) => {
                    if let Some(id) = result.get("breakpointId").and_then(Value::as_str) {
                        tracing::debug!(target: "ferry.dap", line, target, breakpoint = id, "breakpoint set");
                        self.installed_breakpoints.push(id.to_owned());
                    }
                }
                Err(err) => {
                    tracing::warn!(target: "ferry.dap", line, error = %err, "failed to set breakpoint");
                }
            }
        }
    }
}

/// Expose installed packages next to the script; resolution also falls back
/// to `NODE_PATH` when linking is impossible.
async fn link_node_modules(node_modules: &Path, workdir: &Path) {
    #[cfg(unix)]
    {
        let link = workdir.join("node_modules");
        if let Err(err) = tokio::fs::symlink(node_modules, &link).await {
            tracing::warn!(target: "ferry.dap", error = %err, "failed to link node_modules");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (node_modules, workdir);
    }
}
