use std::time::Duration;

use serde_json::json;

use crate::harness::{bun_like, launch_args, session_config, RuntimeScript, TestClient};

#[tokio::test]
async fn call_main_result_is_delivered_with_terminated() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    client.initialize().await;

    let code = "import x from 'lib@1.2.3';\nexport async function main(a: number, b: string) {\n  return { sum: a + 2, b };\n}\n";
    let mut args = launch_args(&mock, code);
    args["callMain"] = json!(true);
    args["args"] = json!({"a": 1, "b": "two"});
    args["env"]["FERRY_TEST_ECHO_SCRIPT"] = json!("1");
    let response = client.request("launch", args).await;
    assert!(response.success, "{:?}", response.message);

    let echoed = client
        .wait_for("script path", |m| {
            m.as_event().is_some_and(|e| {
                e.body.as_ref().is_some_and(|b| {
                    b["output"].as_str().is_some_and(|o| o.starts_with("script: "))
                })
            })
        })
        .await;
    let path = echoed.as_event().unwrap().body.as_ref().unwrap()["output"]
        .as_str()
        .unwrap()
        .trim_start_matches("script: ")
        .trim_end()
        .to_owned();
    let source = std::fs::read_to_string(&path).unwrap();
    let mut lines = source.lines();
    assert!(lines.next().unwrap().starts_with("debugger;"), "{source}");
    assert_eq!(lines.next(), Some("import x from 'lib';"));
    assert!(source.contains("await main(1, \"two\")"), "{source}");
    assert!(source.contains("__FERRY_RESULT__:"), "{source}");

    client.event("stopped").await;
    mock.push_event(
        "Runtime.consoleAPICalled",
        json!({"type": "log", "args": [
            {"type": "string", "value": "__FERRY_RESULT__:{\"sum\":3,\"b\":\"two\"}"}
        ]}),
    );

    let terminated = client.event("terminated").await;
    assert_eq!(terminated.body.unwrap(), json!({"result": {"sum": 3, "b": "two"}}));

    client.settle(Duration::from_millis(200)).await;
    assert!(client.output().iter().all(|o| !o.contains("__FERRY_RESULT__")));
    assert_eq!(client.events_named("terminated").len(), 1);
}

#[tokio::test]
async fn plain_launch_terminates_without_result() {
    let mock = bun_like(RuntimeScript {
        close_after_continue: true,
        ..RuntimeScript::default()
    })
    .await;
    let mut client = TestClient::start(session_config());
    crate::harness::launch(&mut client, &mock, "let x = 1;\n", &[1]).await;
    client.event("stopped").await;
    client.request("continue", json!({"threadId": 1})).await;

    let terminated = client.event("terminated").await;
    assert_eq!(terminated.body, None);
}
