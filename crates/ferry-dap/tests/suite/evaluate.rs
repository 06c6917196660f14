use serde_json::json;

use crate::harness::{bun_like, launch, session_config, RuntimeScript, TestClient};

#[tokio::test]
async fn evaluate_in_frame_strips_await_and_summarises_promises() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "const answer = Promise.resolve(42);\n", &[1]).await;
    client.event("stopped").await;

    let response = client
        .request("evaluate", json!({"expression": "await answer", "frameId": 1, "context": "repl"}))
        .await;
    assert!(response.success, "{:?}", response.message);
    let body = response.body.unwrap();
    assert_eq!(body["result"], "42");
    assert_eq!(body["variablesReference"], 0);

    let calls = mock.calls_to("Debugger.evaluateOnCallFrame");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["callFrameId"], "cf:1");
    assert_eq!(calls[0]["expression"], "answer");
    assert_eq!(calls[0]["generatePreview"], true);
}

#[tokio::test]
async fn evaluate_without_frame_uses_global_scope() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "let x = 1;\n", &[1]).await;
    client.event("stopped").await;

    let response = client.request("evaluate", json!({"expression": "globalThis.x"})).await;
    assert!(response.success);
    assert_eq!(mock.calls_to("Runtime.evaluate")[0]["expression"], "globalThis.x");
    assert!(mock.calls_to("Debugger.evaluateOnCallFrame").is_empty());
}

#[tokio::test]
async fn inspector_errors_fail_the_request() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "let x = 1;\n", &[1]).await;
    client.event("stopped").await;

    // A scope object the mock does not know.
    let scopes = client.request("scopes", json!({"frameId": 1})).await.body.unwrap();
    let global = scopes["scopes"][1]["variablesReference"].as_i64().unwrap();
    let response = client.request("variables", json!({"variablesReference": global})).await;
    assert!(!response.success);
    assert!(
        response.message.as_deref().unwrap().contains("No object with given id"),
        "{:?}",
        response.message
    );
}
