use thiserror::Error;

use crate::token::TokenError;

pub type RequestResult<T> = Result<T, RequestError>;

/// Why a request got a failed response. The display string is the
/// response's `message`.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("not launched")]
    NotLaunched,
    #[error("program is not running")]
    NotRunning,
    #[error("already launched")]
    AlreadyLaunched,
    #[error("invalid arguments for {command}: {message}")]
    InvalidArguments {
        command: &'static str,
        message: String,
    },
    #[error("Unsupported command: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Token(#[from] TokenError),
    #[error("{0}")]
    Inspector(#[from] ferry_inspector::InspectorError),
}

/// A launch that got as far as creating resources and then failed.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("No program or code specified")]
    NothingToRun,
    #[error("failed to write script: {0}")]
    Script(#[from] std::io::Error),
    #[error("failed to resolve launch path: {0}")]
    Path(std::io::Error),
    #[error("Failed to start runtime: {0}")]
    Process(#[from] ferry_process::ProcessError),
    #[error("Failed to connect to runtime inspector: {0}")]
    Connect(ferry_inspector::InspectorError),
    #[error("Failed to configure runtime debugger: {0}")]
    Prime(ferry_inspector::InspectorError),
}
