use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;

use crate::harness::{bun_like, launch_args, session_config, RuntimeScript, TestClient};

/// Launch with the stand-in runtime echoing its script path; returns it.
async fn launch_echoing_script(client: &mut TestClient, mock: &ferry_inspector::mock::MockInspector) -> PathBuf {
    client.initialize().await;
    let mut args = launch_args(mock, "let x = 1;\n");
    args["env"]["FERRY_TEST_ECHO_SCRIPT"] = json!("1");
    let response = client.request("launch", args).await;
    assert!(response.success, "{:?}", response.message);

    let echoed = client
        .wait_for("script path", |m| {
            m.as_event().is_some_and(|e| {
                e.event == "output"
                    && e.body.as_ref().is_some_and(|b| {
                        b["output"].as_str().is_some_and(|o| o.starts_with("script: "))
                    })
            })
        })
        .await;
    let output = echoed.as_event().unwrap().body.as_ref().unwrap()["output"]
        .as_str()
        .unwrap()
        .to_owned();
    PathBuf::from(output.trim_start_matches("script: ").trim_end())
}

#[tokio::test]
async fn terminate_sends_a_single_terminated_and_cleans_up() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    let script = launch_echoing_script(&mut client, &mock).await;
    assert!(script.exists(), "{}", script.display());
    client.event("stopped").await;

    let response = client.request("terminate", json!({})).await;
    assert!(response.success);
    client.event("terminated").await;
    assert!(!script.exists());
    assert!(!script.parent().unwrap().exists());

    let response = client.request("disconnect", json!({})).await;
    assert!(response.success);
    client.closed().await;
    assert_eq!(client.events_named("terminated").len(), 1);
}

#[tokio::test]
async fn second_launch_is_refused() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    crate::harness::launch(&mut client, &mock, "let x = 1;\n", &[]).await;

    let response = client.request("launch", launch_args(&mock, "let y = 2;\n")).await;
    assert!(!response.success);
    assert_eq!(response.message.as_deref(), Some("already launched"));
}

#[tokio::test]
async fn client_going_away_kills_the_runtime() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    let script = launch_echoing_script(&mut client, &mock).await;

    let TestClient { task, .. } = client;
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("session ends when the client leaves")
        .unwrap();
    assert!(!script.exists());
}

#[tokio::test]
async fn service_shutdown_terminates_launched_sessions() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    crate::harness::launch(&mut client, &mock, "let x = 1;\n", &[]).await;
    client.event("stopped").await;

    client.shutdown.cancel();
    client.event("terminated").await;
    client.closed().await;
    assert_eq!(client.events_named("terminated").len(), 1);
}
