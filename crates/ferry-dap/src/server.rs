//! WebSocket front door.
//!
//! Every accepted connection is routed by its request path and then owns one
//! [`DebugSession`](crate::session::DebugSession) for its whole lifetime.
//! Plain HTTP requests (no WebSocket upgrade) get the health check or a short
//! info page instead.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::dap::encode;
use crate::session::{spawn_session, SessionConfig, SessionHandle};

/// How long shutdown waits for sessions to release their runtimes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Legacy prefix some clients still put in front of the runtime path.
const LEGACY_PREFIX: &str = "/ws_debug";

/// Request head bytes inspected before deciding between HTTP and WebSocket.
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// How long a client may take to send its request head.
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

const HEAD_POLL_INTERVAL: Duration = Duration::from_millis(10);

const INFO_PAGE: &str = "Ferry debug service\n\nEndpoints:\n  /typescript - TypeScript/Bun debugging\n  /bun - TypeScript/Bun debugging\n  /health - Health check\n";

/// Where a connection goes, decided from its request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// A Bun/TypeScript debug session.
    Bun,
    /// A runtime this service does not debug; refused with 404.
    Unsupported(&'static str),
}

pub fn route(path: &str) -> Route {
    let trimmed = path.strip_prefix(LEGACY_PREFIX).unwrap_or(path);
    match trimmed.trim_end_matches('/') {
        "" | "/typescript" | "/bun" => Route::Bun,
        "/python" => Route::Unsupported("python"),
        other => {
            tracing::warn!(target: "ferry.server", path = other, "unknown debug path; serving a Bun session");
            Route::Bun
        }
    }
}

pub struct DebugServer {
    listener: TcpListener,
    config: Arc<SessionConfig>,
    shutdown: CancellationToken,
}

impl DebugServer {
    pub async fn bind(addr: impl ToSocketAddrs, config: Arc<SessionConfig>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Cancelling this token stops accepting and ends every session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        sessions.spawn(serve_connection(
                            stream,
                            peer,
                            self.config.clone(),
                            self.shutdown.child_token(),
                        ));
                    }
                    Err(err) => {
                        tracing::warn!(target: "ferry.server", error = %err, "accept failed");
                    }
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(err) = finished {
                        tracing::error!(target: "ferry.server", error = %err, "connection task failed");
                    }
                }
            }
        }

        tracing::info!(target: "ferry.server", active = sessions.len(), "shutting down");
        let drain = async { while sessions.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!(target: "ferry.server", "sessions did not finish in time; aborting");
            sessions.abort_all();
        }
        Ok(())
    }
}

/// The parts of an HTTP request head that decide how it is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub path: String,
    pub upgrade: bool,
}

/// Parse a (possibly partial) request head. `None` until the request line
/// is complete.
pub fn parse_head(bytes: &[u8]) -> Option<RequestHead> {
    let text = String::from_utf8_lossy(bytes);
    let (request_line, headers) = text.split_once("\r\n")?;
    let mut parts = request_line.split(' ');
    let _method = parts.next()?;
    let target = parts.next()?;
    let path = target.split(['?', '#']).next().unwrap_or(target).to_owned();
    let upgrade = headers.lines().any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value.trim().eq_ignore_ascii_case("websocket")
        })
    });
    Some(RequestHead { path, upgrade })
}

/// Look at the request head without consuming it, so a WebSocket handshake
/// can still read it afterwards.
async fn peek_head(stream: &TcpStream) -> std::io::Result<Option<RequestHead>> {
    let mut buf = vec![0u8; MAX_HEAD_BYTES];
    let deadline = tokio::time::Instant::now() + HEAD_TIMEOUT;
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        let complete = buf[..n].windows(4).any(|w| w == b"\r\n\r\n");
        if complete || n == buf.len() {
            return Ok(parse_head(&buf[..n]));
        }
        if tokio::time::Instant::now() >= deadline {
            // Left to the WebSocket handshake to reject.
            return Ok(None);
        }
        tokio::time::sleep(HEAD_POLL_INTERVAL).await;
    }
}

/// Body of `GET /health`.
pub fn health_body(config: &SessionConfig) -> String {
    json!({
        "status": "ok",
        "endpoints": ["/typescript", "/bun"],
        "sandbox": config.sandbox.is_some(),
    })
    .to_string()
}

async fn serve_plain(mut stream: TcpStream, head: &RequestHead, config: &SessionConfig) {
    let path = head.path.strip_prefix(LEGACY_PREFIX).unwrap_or(&head.path);
    let (content_type, body) = if path == "/health" {
        ("application/json", health_body(config))
    } else {
        ("text/plain; charset=utf-8", INFO_PAGE.to_owned())
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(err) = stream.write_all(response.as_bytes()).await {
        tracing::debug!(target: "ferry.server", error = %err, "failed to answer plain request");
        return;
    }
    let _ = stream.shutdown().await;
}

fn not_found(runtime: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(format!("{runtime} debugging is not served here")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<SessionConfig>,
    shutdown: CancellationToken,
) {
    match peek_head(&stream).await {
        Ok(Some(head)) if !head.upgrade => {
            tracing::debug!(target: "ferry.server", %peer, path = %head.path, "plain HTTP request");
            serve_plain(stream, &head, &config).await;
            return;
        }
        Ok(_) => {}
        Err(err) => {
            tracing::debug!(target: "ferry.server", %peer, error = %err, "failed to read request head");
            return;
        }
    }

    let mut path = String::new();
    let callback = |request: &Request, response: Response| {
        path = request.uri().path().to_owned();
        match route(&path) {
            Route::Bun => Ok(response),
            Route::Unsupported(runtime) => Err(not_found(runtime)),
        }
    };
    let socket = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(socket) => socket,
        Err(err) => {
            tracing::info!(target: "ferry.server", %peer, error = %err, "handshake rejected");
            return;
        }
    };
    tracing::info!(target: "ferry.server", %peer, %path, "client connected");

    let (mut sink, mut frames) = socket.split();
    let SessionHandle {
        inbound,
        mut outbound,
        task,
    } = spawn_session(config, shutdown);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match encode(&message) {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(target: "ferry.server", error = %err, "failed to encode message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(frame) = frames.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    tracing::debug!(target: "ferry.server", error = %err, "client socket error");
                    break;
                }
            };
            if inbound.send(text).is_err() {
                break;
            }
        }
    });

    if let Err(err) = task.await {
        tracing::error!(target: "ferry.server", %peer, error = %err, "session task failed");
    }
    reader.abort();
    let _ = writer.await;
    tracing::info!(target: "ferry.server", %peer, "client disconnected");
}
