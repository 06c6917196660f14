use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every message crossing the client socket, tagged by its `type` member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    Request(Request),
    Response(Response),
    Event(Event),
}

impl ProtocolMessage {
    pub fn seq(&self) -> u64 {
        match self {
            ProtocolMessage::Request(request) => request.seq,
            ProtocolMessage::Response(response) => response.seq,
            ProtocolMessage::Event(event) => event.seq,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            ProtocolMessage::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&Event> {
        match self {
            ProtocolMessage::Event(event) => Some(event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub seq: u64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Request {
    pub fn new(seq: u64, command: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            seq,
            command: command.into(),
            arguments,
        }
    }

    /// Typed view of `arguments`; absent arguments read as `{}`.
    pub fn arguments<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let args = self
            .arguments
            .clone()
            .filter(|args| !args.is_null())
            .unwrap_or_else(|| Value::Object(Default::default()));
        serde_json::from_value(args)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub seq: u64,
    pub request_seq: u64,
    pub success: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    pub fn success(seq: u64, request: &Request, body: Option<Value>) -> Self {
        Self {
            seq,
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        }
    }

    pub fn error(seq: u64, request: &Request, message: impl Into<String>) -> Self {
        Self::failure(seq, request.seq, request.command.clone(), message)
    }

    /// A failed response for a frame that never became a [`Request`].
    pub fn failure(
        seq: u64,
        request_seq: u64,
        command: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            seq,
            request_seq,
            success: false,
            command: command.into(),
            message: Some(message.into()),
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Event {
    pub fn new(seq: u64, event: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            seq,
            event: event.into(),
            body,
        }
    }
}
