use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::discovery::{is_banner_line, EndpointScanner, LineBuffer};
use crate::{CommandSpec, ProcessError};

/// How long exit reporting waits for stderr to drain.
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Wrapper binary the runtime command is nested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub binary: PathBuf,
    pub config_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub runtime: PathBuf,
    pub script: PathBuf,
    pub cwd: PathBuf,
    /// The child's complete environment; nothing else is inherited.
    pub env: BTreeMap<String, String>,
    pub inspect_host: String,
    /// Fixed inspector port; a free loopback port is picked when unset.
    pub inspect_port: Option<u16>,
    pub sandbox: Option<SandboxSpec>,
    pub discovery_timeout: Duration,
}

impl LaunchSpec {
    pub fn new(runtime: impl Into<PathBuf>, script: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            runtime: runtime.into(),
            script: script.into(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            inspect_host: "127.0.0.1".to_owned(),
            inspect_port: None,
            sandbox: None,
            discovery_timeout: Duration::from_secs(10),
        }
    }

    /// The runtime invocation, wrapped in the sandbox when one is configured.
    ///
    /// The runtime argv always forms the tail of the command unchanged.
    pub fn command(&self, port: u16) -> CommandSpec {
        let runtime_args = vec![
            format!("--inspect-wait={}:{port}", self.inspect_host),
            self.script.display().to_string(),
        ];

        let Some(sandbox) = &self.sandbox else {
            return CommandSpec::new(&self.cwd, &self.runtime, &runtime_args);
        };

        let mut args = Vec::new();
        if let Some(config) = &sandbox.config_path {
            args.push("--config".to_owned());
            args.push(config.display().to_string());
        }
        args.extend(sandbox.extra_args.iter().cloned());
        args.push("--cwd".to_owned());
        args.push(self.cwd.display().to_string());
        args.push("--".to_owned());
        args.push(self.runtime.display().to_string());
        args.extend(runtime_args);

        CommandSpec::new(&self.cwd, &sandbox.binary, &args)
    }
}

/// Reserve a free port on `host` by binding and releasing it.
pub(crate) fn pick_port(host: &str) -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A non-banner stderr line.
    Output { line: String },
    Exited { code: Option<i32> },
}

/// Handle to a running script runtime.
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct RuntimeProcess {
    pid: Option<u32>,
    inspector_url: String,
    command: CommandSpec,
    kill: CancellationToken,
}

impl RuntimeProcess {
    /// Spawn the runtime and wait until it announces its inspector endpoint.
    ///
    /// Stderr lines (minus the banner) and the final exit are reported on the
    /// returned channel; `Exited` is always the last event.
    pub async fn start(
        spec: &LaunchSpec,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ProcessEvent>), ProcessError> {
        let port = match spec.inspect_port {
            Some(port) => port,
            None => pick_port(&spec.inspect_host)?,
        };
        let command = spec.command(port);
        tracing::info!(target: "ferry.process", %command, "starting runtime");

        let mut child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: command.clone(),
                source,
            })?;
        let pid = child.id();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<Result<String, String>>();
        let kill = CancellationToken::new();

        let stderr_task = child.stderr.take().map(|mut stderr| {
            let events = events_tx.clone();
            tokio::spawn(async move {
                let mut endpoint_tx = Some(endpoint_tx);
                let mut scanner = EndpointScanner::new();
                let mut lines = LineBuffer::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = match stderr.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    for line in lines.push(&buf[..n]) {
                        if let Some(url) = scanner.push(&format!("{line}\n")) {
                            tracing::info!(target: "ferry.process", %url, "inspector endpoint discovered");
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(Ok(url));
                            }
                        }
                        forward_line(&events, line);
                    }
                }
                if let Some(line) = lines.finish() {
                    scanner.push(&line);
                    forward_line(&events, line);
                }
                if let Some(tx) = endpoint_tx.take() {
                    let _ = tx.send(Err(scanner.tail().to_owned()));
                }
            })
        });

        if let Some(stdout) = child.stdout.take() {
            // Console output reaches the client through the inspector; stdout
            // is only drained so the child never blocks on a full pipe.
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::trace!(target: "ferry.process", %line, "runtime stdout");
                }
            });
        }

        let exit_kill = kill.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = exit_kill.cancelled() => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let code = match status {
                Ok(status) => status.code(),
                Err(err) => {
                    tracing::warn!(target: "ferry.process", error = %err, "failed to wait for runtime");
                    None
                }
            };
            tracing::info!(target: "ferry.process", ?code, "runtime exited");
            if let Some(task) = stderr_task {
                let _ = tokio::time::timeout(STDERR_DRAIN_GRACE, task).await;
            }
            let _ = events_tx.send(ProcessEvent::Exited { code });
        });

        let discovered = tokio::time::timeout(spec.discovery_timeout, endpoint_rx).await;
        let inspector_url = match discovered {
            Ok(Ok(Ok(url))) => url,
            Ok(Ok(Err(tail))) => {
                kill.cancel();
                return Err(ProcessError::ExitedBeforeDiscovery { tail });
            }
            Ok(Err(_closed)) => {
                kill.cancel();
                return Err(ProcessError::ExitedBeforeDiscovery {
                    tail: String::new(),
                });
            }
            Err(_elapsed) => {
                kill.cancel();
                return Err(ProcessError::DiscoveryTimeout(spec.discovery_timeout));
            }
        };

        Ok((
            Self {
                pid,
                inspector_url,
                command,
                kill,
            },
            events_rx,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn inspector_url(&self) -> &str {
        &self.inspector_url
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    /// Request termination. `Exited` follows on the event channel.
    pub fn kill(&self) {
        self.kill.cancel();
    }
}

impl Drop for RuntimeProcess {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

fn forward_line(events: &mpsc::UnboundedSender<ProcessEvent>, line: String) {
    if is_banner_line(&line) {
        return;
    }
    let _ = events.send(ProcessEvent::Output { line });
}
