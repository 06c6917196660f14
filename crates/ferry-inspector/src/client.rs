use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::pending::PendingCalls;
use crate::types::{CallFrame, InspectorError, InspectorEvent, InspectorFrame, Result};

#[derive(Debug, Clone)]
pub struct InspectorClientConfig {
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for InspectorClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct Inner {
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingCalls<Value>,
    shutdown: CancellationToken,
    config: InspectorClientConfig,
}

/// Connection to one runtime inspector endpoint.
///
/// Cheap to clone; all clones share the socket and the pending-call table.
#[derive(Debug, Clone)]
pub struct InspectorClient {
    inner: Arc<Inner>,
}

impl InspectorClient {
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<InspectorEvent>)> {
        Self::connect_with_config(url, InspectorClientConfig::default()).await
    }

    /// Opens the socket and starts the reader/writer tasks.
    ///
    /// Notifications are delivered on the returned receiver in arrival order,
    /// followed by a single [`InspectorEvent::Closed`] once the socket ends.
    pub async fn connect_with_config(
        url: &str,
        config: InspectorClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InspectorEvent>)> {
        let (stream, _response) =
            tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| InspectorError::Timeout {
                    method: "connect".to_owned(),
                })??;
        tracing::debug!(target: "ferry.inspector", %url, "connected to inspector");

        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            outbound,
            pending: PendingCalls::new(),
            shutdown: CancellationToken::new(),
            config,
        });

        let shutdown = inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = outbound_rx.recv() => message,
                };
                let Some(message) = message else {
                    break;
                };
                if let Err(err) = sink.send(message).await {
                    tracing::debug!(target: "ferry.inspector", error = %err, "inspector write failed");
                    shutdown.cancel();
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        let reader_inner = inner.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = reader_inner.shutdown.cancelled() => break,
                    next = source.next() => next,
                };
                let text = match next {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        tracing::debug!(target: "ferry.inspector", error = %err, "inspector read failed");
                        break;
                    }
                };

                match InspectorFrame::parse(&text) {
                    Ok(InspectorFrame::Reply { id, result }) => {
                        let result = result.map_err(InspectorError::from);
                        if !reader_inner.pending.complete(id, result) {
                            tracing::trace!(target: "ferry.inspector", id, "reply for unknown call");
                        }
                    }
                    Ok(InspectorFrame::Event { method, params }) => {
                        let _ = events_tx.send(InspectorEvent::Notification { method, params });
                    }
                    Err(err) => {
                        tracing::warn!(target: "ferry.inspector", error = %err, "dropping inspector frame");
                    }
                }
            }

            reader_inner.shutdown.cancel();
            let failed = reader_inner
                .pending
                .fail_all(InspectorError::ConnectionClosed);
            if failed > 0 {
                tracing::debug!(target: "ferry.inspector", failed, "rejected pending calls on close");
            }
            let _ = events_tx.send(InspectorEvent::Closed);
        });

        Ok((Self { inner }, events_rx))
    }

    /// Issue `method` and wait for its `result` member.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if self.inner.shutdown.is_cancelled() {
            return Err(InspectorError::ConnectionClosed);
        }

        let (id, rx) = self.inner.pending.register();
        let frame = CallFrame {
            id,
            method,
            params: &params,
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(err) => {
                self.inner.pending.remove(id);
                return Err(InspectorError::Protocol(err.to_string()));
            }
        };
        tracing::trace!(target: "ferry.inspector", id, method, "inspector call");

        if self.inner.outbound.send(Message::Text(text.into())).is_err() {
            self.inner.pending.remove(id);
            return Err(InspectorError::ConnectionClosed);
        }

        self.inner
            .pending
            .wait(
                id,
                rx,
                self.inner.config.call_timeout,
                &self.inner.shutdown,
                || InspectorError::Timeout {
                    method: method.to_owned(),
                },
            )
            .await
    }

    /// Close the socket. Outstanding calls are rejected.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Cancelled on [`InspectorClient::shutdown`] or when the socket closes.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }
}
