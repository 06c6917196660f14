//! Subprocess handling for the debug bridge.
//!
//! [`RuntimeProcess`] owns one launched script runtime: it builds the launch
//! command (optionally wrapped in a sandbox), discovers the inspector endpoint
//! the runtime announces on stderr, forwards the rest of stderr, and reports
//! exit. [`run_with_input`] runs short helper commands with bounded capture.

mod discovery;
mod runtime;

use std::{
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

pub use discovery::{is_banner_line, EndpointScanner, LineBuffer};
pub use runtime::{LaunchSpec, ProcessEvent, RuntimeProcess, SandboxSpec};
pub use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: CommandSpec,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {0:?} waiting for the inspector endpoint")]
    DiscoveryTimeout(Duration),
    #[error("runtime exited before announcing an inspector endpoint{}", tail_suffix(.tail))]
    ExitedBeforeDiscovery { tail: String },
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout {
        command: CommandSpec,
        timeout: Duration,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn tail_suffix(tail: &str) -> String {
    if tail.trim().is_empty() {
        String::new()
    } else {
        format!(": {}", tail.trim())
    }
}

/// A full command invocation (cwd + program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(cwd: &Path, program: &Path, args: &[String]) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            program: program.to_path_buf(),
            args: args.to_vec(),
        }
    }

    /// Program followed by args, as a single argv vector.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') || arg.contains('\t') {
                write!(f, " \"{}\"", arg.replace('"', "\\\""))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured stdout/stderr, truncated to a maximum size per stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream had more bytes than were captured.
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    /// Maximum bytes to capture per stream.
    pub max_bytes: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub code: Option<i32>,
    pub output: BoundedOutput,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `command`, feed `input` on stdin and collect bounded output.
///
/// The child inherits the service environment. It is killed when `opts.timeout`
/// elapses.
pub async fn run_with_input(
    command: &CommandSpec,
    input: &[u8],
    opts: &RunOptions,
) -> Result<CommandResult, ProcessError> {
    let mut child = tokio::process::Command::new(&command.program)
        .args(&command.args)
        .current_dir(&command.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            command: command.clone(),
            source,
        })?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let max_bytes = opts.max_bytes;

    let work = async {
        let write_input = async {
            if let Some(mut stdin) = stdin {
                // A child that exits without reading stdin is not an error here.
                let _ = stdin.write_all(input).await;
                let _ = stdin.shutdown().await;
            }
        };
        let ((), (stdout, stdout_truncated), (stderr, stderr_truncated)) = tokio::join!(
            write_input,
            read_bounded(stdout, max_bytes),
            read_bounded(stderr, max_bytes),
        );
        let status = child.wait().await?;
        Ok::<_, std::io::Error>(CommandResult {
            code: status.code(),
            output: BoundedOutput {
                stdout,
                stderr,
                truncated: stdout_truncated || stderr_truncated,
            },
        })
    };

    match tokio::time::timeout(opts.timeout, work).await {
        Ok(result) => Ok(result?),
        Err(_elapsed) => Err(ProcessError::Timeout {
            command: command.clone(),
            timeout: opts.timeout,
        }),
    }
}

async fn read_bounded<R>(reader: Option<R>, max_bytes: usize) -> (String, bool)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return (String::new(), false);
    };
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8 * 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = max_bytes.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    (String::from_utf8_lossy(&kept).into_owned(), truncated)
}
