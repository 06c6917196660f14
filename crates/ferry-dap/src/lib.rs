//! Debug Adapter Protocol bridge for script runtimes.
//!
//! Clients speak DAP as JSON text frames over a WebSocket. For every
//! connection the bridge launches the client's script under a runtime with its
//! inspector enabled, connects to that inspector, and translates between the
//! two protocols: breakpoints and stepping go one way, pauses, console output
//! and termination come back.

pub mod dap;
pub mod deps;
pub mod error;
pub mod remote;
pub mod render;
pub mod script;
pub mod server;
pub mod session;
pub mod sourcemap;
pub mod token;

pub use server::{route, DebugServer, Route};
pub use session::{spawn_session, DebugSession, SessionConfig, SessionHandle, SessionState};
pub use token::{KeyCache, KeySource, TokenError, TokenKind, TokenVerifier};
