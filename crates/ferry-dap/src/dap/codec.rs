use serde_json::Value;

use super::messages::{ProtocolMessage, Request};
use super::MAX_DAP_MESSAGE_BYTES;

/// Why an inbound frame could not be turned into a [`Request`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("DAP frame of {len} bytes exceeds maximum allowed size {MAX_DAP_MESSAGE_BYTES}")]
    TooLarge { len: usize },
    /// Not valid JSON or not a valid request. `seq`/`command` are recovered
    /// when the frame carried them so the client can still be answered.
    #[error("malformed DAP frame: {message}")]
    Malformed {
        seq: Option<u64>,
        command: Option<String>,
        message: String,
    },
    /// A well-formed response or event sent by the client.
    #[error("unexpected DAP {kind} from client")]
    NotARequest { kind: &'static str },
}

/// Client-facing text for a JSON decoding error.
///
/// serde quotes the offending payload value (`invalid type: string "..."`,
/// ``unknown field `...` ``). Launch and evaluate arguments carry tokens,
/// environment values and source code, so the value is reduced to its kind
/// and only the schema side of the message is kept. Syntax errors carry no
/// payload text and pass through.
pub(crate) fn describe_json_error(err: &serde_json::Error) -> String {
    let message = err.to_string();
    for prefix in ["invalid type: ", "invalid value: "] {
        if let Some(rest) = message.strip_prefix(prefix) {
            let (unexpected, expected) = match rest.rsplit_once(", expected ") {
                Some((unexpected, expected)) => (unexpected, Some(expected)),
                None => (rest, None),
            };
            let kind = unexpected.split(['"', '`']).next().unwrap_or_default().trim();
            return match expected {
                Some(expected) => format!("{prefix}{kind}, expected {expected}"),
                None => format!("{prefix}{kind}"),
            };
        }
    }
    for prefix in ["unknown field ", "unknown variant "] {
        if let Some(rest) = message.strip_prefix(prefix) {
            let name = prefix.trim_end();
            return match rest.rsplit_once(", expected ") {
                Some((_, expected)) => format!("{name}, expected {expected}"),
                None => name.to_owned(),
            };
        }
    }
    message
}

/// Parse one client frame.
pub fn decode_request(text: &str) -> Result<Request, FrameError> {
    if text.len() > MAX_DAP_MESSAGE_BYTES {
        return Err(FrameError::TooLarge { len: text.len() });
    }

    let value: Value = serde_json::from_str(text).map_err(|err| FrameError::Malformed {
        seq: None,
        command: None,
        message: describe_json_error(&err),
    })?;

    let seq = value.get("seq").and_then(Value::as_u64);
    let command = value
        .get("command")
        .and_then(Value::as_str)
        .map(str::to_owned);

    match serde_json::from_value::<ProtocolMessage>(value) {
        Ok(ProtocolMessage::Request(request)) => Ok(request),
        Ok(ProtocolMessage::Response(_)) => Err(FrameError::NotARequest { kind: "response" }),
        Ok(ProtocolMessage::Event(_)) => Err(FrameError::NotARequest { kind: "event" }),
        Err(err) => Err(FrameError::Malformed {
            seq,
            command,
            message: describe_json_error(&err),
        }),
    }
}

/// Serialize one outbound message into a text frame.
pub fn encode(message: &ProtocolMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
