use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::types::RemoteError;

/// Path segment the mock serves on, shaped like a real runtime's session id.
pub const MOCK_SESSION_PATH: &str = "mockinspector1";

/// Scripted answer to one inspector call.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub result: Result<Value, RemoteError>,
    /// Notifications sent right after the reply, in order.
    pub events: Vec<(String, Value)>,
    pub delay: Option<Duration>,
    /// Skip the reply frame entirely.
    pub silent: bool,
    /// Close the socket after replying and emitting events.
    pub close: bool,
}

impl MockReply {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Ok(result),
            events: Vec::new(),
            delay: None,
            silent: false,
            close: false,
        }
    }

    pub fn error(code: i64, message: &str) -> Self {
        Self {
            result: Err(RemoteError {
                code,
                message: message.to_owned(),
            }),
            ..Self::ok(Value::Null)
        }
    }

    pub fn no_reply() -> Self {
        Self {
            silent: true,
            ..Self::ok(Value::Null)
        }
    }

    pub fn with_event(mut self, method: &str, params: Value) -> Self {
        self.events.push((method.to_owned(), params));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn then_close(mut self) -> Self {
        self.close = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

type Handler = Arc<dyn Fn(&str, &Value) -> MockReply + Send + Sync>;

struct State {
    handler: Handler,
    calls: Mutex<Vec<RecordedCall>>,
    pushed: broadcast::Sender<String>,
}

/// A tiny inspector endpoint for tests.
///
/// Every call is recorded and answered by the handler closure; tests can also
/// push notifications to connected clients at any time.
pub struct MockInspector {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<State>,
}

impl MockInspector {
    /// Answers every call with an empty result.
    pub async fn spawn() -> std::io::Result<Self> {
        Self::spawn_with_handler(|_method, _params| MockReply::ok(json!({}))).await
    }

    pub async fn spawn_with_handler<F>(handler: F) -> std::io::Result<Self>
    where
        F: Fn(&str, &Value) -> MockReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let (pushed, _) = broadcast::channel(64);
        let state = Arc::new(State {
            handler: Arc::new(handler),
            calls: Mutex::new(Vec::new()),
            pushed,
        });

        tokio::spawn(run(listener, state.clone(), shutdown.clone()));

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}/{}", self.addr, MOCK_SESSION_PATH)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.state
            .calls
            .lock()
            .iter()
            .map(|call| call.method.clone())
            .collect()
    }

    /// Params of every call to `method`, in arrival order.
    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|call| call.method == method)
            .map(|call| call.params.clone())
            .collect()
    }

    pub fn push_event(&self, method: &str, params: Value) {
        let frame = json!({"method": method, "params": params}).to_string();
        let _ = self.state.pushed.send(frame);
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockInspector {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run(listener: TcpListener, state: Arc<State>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return,
            res = listener.accept() => res,
        };
        let Ok((socket, _)) = accepted else {
            continue;
        };
        tokio::spawn(serve_connection(socket, state.clone(), shutdown.clone()));
    }
}

async fn serve_connection(
    socket: tokio::net::TcpStream,
    state: Arc<State>,
    shutdown: CancellationToken,
) {
    let Ok(stream) = tokio_tungstenite::accept_async(socket).await else {
        return;
    };
    let (mut sink, mut source) = stream.split();
    let mut pushed = state.pushed.subscribe();

    loop {
        let incoming = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = pushed.recv() => {
                match frame {
                    Ok(frame) => {
                        if sink.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                continue;
            }
            incoming = source.next() => incoming,
        };

        let text = match incoming {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        };
        let Ok(call) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let id = call.get("id").and_then(Value::as_u64).unwrap_or(0);
        let method = call
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let params = call.get("params").cloned().unwrap_or(Value::Null);

        state.calls.lock().push(RecordedCall {
            id,
            method: method.clone(),
            params: params.clone(),
        });
        let reply = (state.handler)(&method, &params);

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        if !reply.silent {
            let frame = match &reply.result {
                Ok(result) => json!({"id": id, "result": result}),
                Err(err) => json!({"id": id, "error": err}),
            };
            if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                break;
            }
        }
        for (method, params) in reply.events {
            let frame = json!({"method": method, "params": params});
            if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                return;
            }
        }
        if reply.close {
            let _ = sink.send(Message::Close(None)).await;
            break;
        }
    }
}
