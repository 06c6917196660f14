use serde_json::json;

use crate::harness::{session_config, TestClient};

#[tokio::test]
async fn initialize_answers_capabilities_before_initialized_event() {
    let mut client = TestClient::start(session_config());
    let seq = client.send("initialize", json!({"adapterID": "ferry", "linesStartAt1": true}));

    let response = client.response(seq).await;
    assert!(response.success);
    assert_eq!(response.command, "initialize");
    let caps = response.body.expect("capabilities body");
    assert_eq!(caps["supportsConfigurationDoneRequest"], true);
    assert_eq!(caps["supportsTerminateRequest"], true);

    client.event("initialized").await;
    let response_at = client
        .position(|m| m.as_response().is_some_and(|r| r.request_seq == seq))
        .unwrap();
    let event_at = client
        .position(|m| m.as_event().is_some_and(|e| e.event == "initialized"))
        .unwrap();
    assert!(response_at < event_at);
}

#[tokio::test]
async fn outgoing_sequence_numbers_increase() {
    let mut client = TestClient::start(session_config());
    client.initialize().await;
    client.request("threads", json!({})).await;

    let seqs: Vec<u64> = client.log.iter().map(|m| m.seq()).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{seqs:?}");
}

#[tokio::test]
async fn runtime_requests_fail_before_launch() {
    let mut client = TestClient::start(session_config());
    client.initialize().await;

    for command in ["stackTrace", "scopes", "variables", "evaluate", "continue", "next"] {
        let response = client.request(command, json!({"variablesReference": 1, "expression": "1"})).await;
        assert!(!response.success, "{command} should fail");
        assert_eq!(response.message.as_deref(), Some("not launched"), "{command}");
    }

    let threads = client.request("threads", json!({})).await;
    assert!(threads.success);
    assert_eq!(threads.body.unwrap()["threads"][0]["id"], 1);
}

#[tokio::test]
async fn unknown_command_is_reported_by_name() {
    let mut client = TestClient::start(session_config());
    let response = client.request("restartFrame", json!({})).await;
    assert!(!response.success);
    assert_eq!(response.command, "restartFrame");
    assert_eq!(response.message.as_deref(), Some("Unsupported command: restartFrame"));
}

#[tokio::test]
async fn malformed_frame_with_seq_gets_a_failed_response() {
    let mut client = TestClient::start(session_config());
    // `command` must be a string.
    client.send_raw(r#"{"seq": 41, "type": "request", "command": 7}"#);
    let response = client.response(41).await;
    assert!(!response.success);

    // Unparseable frames are dropped and the session keeps serving.
    client.send_raw("{not json");
    let response = client.request("threads", json!({})).await;
    assert!(response.success);
}

#[tokio::test]
async fn launch_argument_errors_do_not_echo_values() {
    let mut client = TestClient::start(session_config());
    client.initialize().await;

    let secret = "ferry-super-secret-value";
    let response = client
        .request("launch", json!({"code": "1", "callMain": secret}))
        .await;
    assert!(!response.success);
    let message = response.message.unwrap_or_default();
    assert!(!message.contains(secret), "{message}");
    assert!(message.contains("invalid type: string, expected a boolean"), "{message}");
    assert!(client.events_named("terminated").is_empty());
}

#[tokio::test]
async fn launch_without_code_or_program_fails() {
    let mut client = TestClient::start(session_config());
    client.initialize().await;
    let response = client.request("launch", json!({"code": ""})).await;
    assert!(!response.success);
    assert_eq!(response.message.as_deref(), Some("No program or code specified"));
}

#[tokio::test]
async fn disconnect_before_launch_ends_the_session_quietly() {
    let mut client = TestClient::start(session_config());
    client.initialize().await;
    let response = client.request("disconnect", json!({})).await;
    assert!(response.success);

    client.closed().await;
    assert!(client.events_named("terminated").is_empty());
}
