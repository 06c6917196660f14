//! Debug Adapter Protocol message model and frame handling.
//!
//! Each WebSocket text frame carries exactly one JSON protocol message; there
//! is no `Content-Length` framing on this transport.

pub mod codec;
pub mod messages;

/// Maximum allowed size (in bytes) for a single DAP frame.
///
/// Launch requests carry whole scripts, so this is generous; anything larger
/// is rejected before it reaches the JSON parser.
pub const MAX_DAP_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

pub use codec::{decode_request, encode, FrameError};
pub use messages::{Event, ProtocolMessage, Request, Response};
