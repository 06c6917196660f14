use std::time::Duration;

use ferry_dap::deps::DependencyPreparer;
use serde_json::json;

use crate::harness::{bun_like, helper, launch_args, session_config, RuntimeScript, TestClient};

#[tokio::test]
async fn runtime_stderr_is_forwarded_without_the_banner() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    client.initialize().await;
    let mut args = launch_args(&mock, "let x = 1;\n");
    args["env"]["FERRY_TEST_STDERR"] = json!("warn: slow start");
    assert!(client.request("launch", args).await.success);

    let output = client.event("output").await.body.unwrap();
    assert_eq!(output["category"], "stderr");
    assert_eq!(output["output"], "warn: slow start\n");
    assert!(client.output().iter().all(|o| !o.contains("ws://")));
}

#[tokio::test]
async fn runtime_runs_in_the_service_directory_by_default() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    client.initialize().await;
    let mut args = launch_args(&mock, "let x = 1;\n");
    args["env"]["FERRY_TEST_ECHO_CWD"] = json!("1");
    assert!(client.request("launch", args).await.success);

    let output = client.event("output").await.body.unwrap();
    let expected = std::env::current_dir().unwrap();
    assert_eq!(output["output"], format!("cwd: {}\n", expected.display()));
}

#[tokio::test]
async fn runtime_exit_terminates_the_session() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    client.initialize().await;
    let mut args = launch_args(&mock, "let x = 1;\n");
    args["env"]["FERRY_TEST_EXIT_AFTER_MS"] = json!(300);
    args["env"]["FERRY_TEST_EXIT_CODE"] = json!(3);
    assert!(client.request("launch", args).await.success);

    client.event("terminated").await;
    client.settle(Duration::from_millis(300)).await;
    assert_eq!(client.events_named("terminated").len(), 1);
}

#[tokio::test]
async fn failed_runtime_start_reports_and_terminates() {
    let mut config = session_config();
    config.runtime_path = "/definitely/not/a/runtime".into();
    let mut client = TestClient::start(config);
    client.initialize().await;

    let response = client.request("launch", json!({"code": "let x = 1;\n"})).await;
    assert!(!response.success);
    let message = response.message.unwrap();
    assert!(message.starts_with("Failed to start runtime:"), "{message}");

    client.event("terminated").await;
    client.settle(Duration::from_millis(200)).await;
    let output = client.output();
    assert_eq!(output.len(), 1);
    assert!(output[0].starts_with("Failed to start runtime:"));
    assert_eq!(client.events_named("terminated").len(), 1);
}

#[tokio::test]
async fn prepared_dependencies_are_announced() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut config = session_config();
    config.dependencies = Some(DependencyPreparer::new(helper(), Duration::from_secs(10)));
    let mut client = TestClient::start(config);
    client.initialize().await;

    let code = "import pad from 'left-pad@1.3.0';\nconsole.log(pad('1', 3));\n";
    let response = client.request("launch", launch_args(&mock, code)).await;
    assert!(response.success, "{:?}", response.message);

    let output = client.event("output").await.body.unwrap();
    assert_eq!(output["category"], "console");
    let text = output["output"].as_str().unwrap();
    assert!(text.starts_with("Dependencies installed at: "), "{text}");
    assert!(text.trim_end().ends_with("ferry-test-node-modules"), "{text}");
}

#[tokio::test]
async fn dependency_failure_is_a_warning_not_an_error() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut config = session_config();
    config.dependencies = Some(DependencyPreparer::new(helper(), Duration::from_secs(10)));
    let mut client = TestClient::start(config);
    client.initialize().await;

    let response = client
        .request("launch", launch_args(&mock, "// FAIL_DEPS\nlet x = 1;\n"))
        .await;
    assert!(response.success, "{:?}", response.message);

    let output = client.event("output").await.body.unwrap();
    assert_eq!(output["category"], "console");
    assert_eq!(
        output["output"],
        "Warning: Failed to prepare dependencies: registry unreachable\n"
    );
    client.event("stopped").await;
}
