//! Client for the CDP-style Inspector Protocol spoken by script runtimes.
//!
//! Frames are JSON text messages over a WebSocket: `{id, method, params}` calls,
//! `{id, result | error}` replies and `{method, params}` notifications. The
//! client correlates replies through [`PendingCalls`] and forwards
//! notifications to a single channel owned by the debug session.

mod client;
mod pending;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use client::{InspectorClient, InspectorClientConfig};
pub use pending::PendingCalls;
pub use types::{InspectorError, InspectorEvent, InspectorFrame, RemoteError, Result};
