use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Result<T> = std::result::Result<T, InspectorError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum InspectorError {
    #[error("inspector call {method} timed out")]
    Timeout { method: String },
    #[error("inspector connection closed")]
    ConnectionClosed,
    #[error("inspector call cancelled")]
    Cancelled,
    #[error("inspector error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("inspector protocol error: {0}")]
    Protocol(String),
    #[error("inspector transport error: {0}")]
    WebSocket(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for InspectorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        InspectorError::WebSocket(err.to_string())
    }
}

/// The `error` member of a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl From<RemoteError> for InspectorError {
    fn from(err: RemoteError) -> Self {
        InspectorError::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

/// An inbound frame, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum InspectorFrame {
    Reply {
        id: u64,
        result: std::result::Result<Value, RemoteError>,
    },
    Event {
        method: String,
        params: Value,
    },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Value,
    error: Option<RemoteError>,
}

impl InspectorFrame {
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|err| InspectorError::Protocol(format!("malformed frame: {err}")))?;

        match (raw.id, raw.method) {
            (Some(id), _) => Ok(InspectorFrame::Reply {
                id,
                result: match raw.error {
                    Some(err) => Err(err),
                    None => Ok(raw.result),
                },
            }),
            (None, Some(method)) => Ok(InspectorFrame::Event {
                method,
                params: raw.params,
            }),
            (None, None) => Err(InspectorError::Protocol(
                "frame has neither `id` nor `method`".to_owned(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CallFrame<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

/// What the client hands to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum InspectorEvent {
    Notification { method: String, params: Value },
    /// The socket is gone; every pending call has already been rejected.
    Closed,
}
