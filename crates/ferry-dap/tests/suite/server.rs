use std::sync::Arc;

use ferry_dap::DebugServer;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::harness::session_config;

async fn start_server() -> (std::net::SocketAddr, tokio_util::sync::CancellationToken, tokio::task::JoinHandle<std::io::Result<()>>) {
    let server = DebugServer::bind("127.0.0.1:0", Arc::new(session_config()))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_token();
    let task = tokio::spawn(server.run());
    (addr, shutdown, task)
}

#[tokio::test]
async fn python_route_is_refused_with_404() {
    let (addr, shutdown, task) = start_server().await;

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws_debug/python"))
        .await
        .unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 404),
        other => panic!("unexpected error: {other}"),
    }

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn typescript_route_speaks_dap_over_text_frames() {
    let (addr, shutdown, task) = start_server().await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws_debug/typescript"))
        .await
        .unwrap();
    let request = json!({"seq": 1, "type": "request", "command": "initialize", "arguments": {}});
    socket.send(Message::Text(request.to_string().into())).await.unwrap();

    let mut received = Vec::new();
    while received.len() < 2 {
        let frame = socket.next().await.expect("frame").unwrap();
        if let Message::Text(text) = frame {
            received.push(serde_json::from_str::<Value>(&text).unwrap());
        }
    }
    assert_eq!(received[0]["type"], "response");
    assert_eq!(received[0]["request_seq"], 1);
    assert_eq!(received[0]["success"], true);
    assert_eq!(received[1]["type"], "event");
    assert_eq!(received[1]["event"], "initialized");

    let disconnect = json!({"seq": 2, "type": "request", "command": "disconnect"});
    socket.send(Message::Text(disconnect.to_string().into())).await.unwrap();
    let mut saw_response = false;
    while let Some(Ok(frame)) = socket.next().await {
        if let Message::Text(text) = frame {
            let message: Value = serde_json::from_str(&text).unwrap();
            if message["request_seq"] == 2 {
                saw_response = true;
            }
        }
    }
    assert!(saw_response);

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn health_check_answers_plain_http() {
    let (addr, shutdown, task) = start_server().await;

    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({"status": "ok", "endpoints": ["/typescript", "/bun"], "sandbox": false})
    );

    let info = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert_eq!(info.status(), 200);
    assert!(info.text().await.unwrap().contains("/health - Health check"));

    // WebSocket clients on the same listener are unaffected.
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/bun"))
        .await
        .unwrap();
    socket.close(None).await.unwrap();

    shutdown.cancel();
    task.await.unwrap().unwrap();
}
