//! Dependency installation ahead of a launch.
//!
//! An external tool reads `{"code", "language"}` on stdin, installs what the
//! script imports, logs freely, and ends its stdout with one JSON line:
//! `{"success": bool, "node_modules_path"?: string, "error"?: string}`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ferry_process::{run_with_input, CommandSpec, RunOptions};
use serde::{Deserialize, Serialize};

/// Subcommand of the tool that installs a script's imports.
const PREPARE_SUBCOMMAND: &str = "prepare-deps";

/// Stderr noise the tool prints on every run.
const STANDALONE_NOTICE: &str = "Running in standalone mode";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    Installed { node_modules: PathBuf },
    /// Success without a `node_modules` directory (nothing to install).
    NothingToInstall,
    Failed(String),
}

#[derive(Serialize)]
struct PrepareRequest<'a> {
    code: &'a str,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct PrepareResponse {
    success: bool,
    #[serde(default)]
    node_modules_path: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DependencyPreparer {
    binary: PathBuf,
    timeout: Duration,
}

impl DependencyPreparer {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run the tool for `code`. Never fails the launch by itself: every
    /// problem is folded into [`PrepareOutcome::Failed`].
    pub async fn prepare(&self, code: &str, language: &str, cwd: &Path) -> PrepareOutcome {
        let mut input = match serde_json::to_vec(&PrepareRequest { code, language }) {
            Ok(input) => input,
            Err(err) => return PrepareOutcome::Failed(err.to_string()),
        };
        input.push(b'\n');
        let command = CommandSpec::new(cwd, &self.binary, &[PREPARE_SUBCOMMAND.to_owned()]);
        let opts = RunOptions {
            timeout: self.timeout,
            ..RunOptions::default()
        };

        tracing::debug!(target: "ferry.dap", %command, "preparing dependencies");
        let result = match run_with_input(&command, &input, &opts).await {
            Ok(result) => result,
            Err(err) => return PrepareOutcome::Failed(err.to_string()),
        };
        let stderr = filter_stderr(&result.output.stderr);
        if !stderr.is_empty() {
            tracing::debug!(target: "ferry.dap", %stderr, "dependency tool stderr");
        }

        let outcome = parse_outcome(&result.output.stdout);
        if !result.success() {
            if let PrepareOutcome::Failed(_) = outcome {
                return outcome;
            }
            return PrepareOutcome::Failed(format!(
                "dependency tool exited with {}",
                result
                    .code
                    .map_or_else(|| "a signal".to_owned(), |code| format!("code {code}"))
            ));
        }
        outcome
    }
}

fn filter_stderr(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| !line.contains(STANDALONE_NOTICE))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

/// Interpret the tool's stdout; only the last non-empty line is the response.
pub fn parse_outcome(stdout: &str) -> PrepareOutcome {
    let Some(last) = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) else {
        return PrepareOutcome::Failed("dependency tool produced no output".to_owned());
    };
    let response: PrepareResponse = match serde_json::from_str(last) {
        Ok(response) => response,
        Err(err) => {
            return PrepareOutcome::Failed(format!("unreadable dependency tool response: {err}"))
        }
    };

    match response {
        PrepareResponse {
            success: true,
            node_modules_path: Some(path),
            ..
        } if !path.is_empty() => PrepareOutcome::Installed {
            node_modules: PathBuf::from(path),
        },
        PrepareResponse { success: true, .. } => PrepareOutcome::NothingToInstall,
        PrepareResponse { error, .. } => {
            PrepareOutcome::Failed(error.unwrap_or_else(|| "unknown error".to_owned()))
        }
    }
}
