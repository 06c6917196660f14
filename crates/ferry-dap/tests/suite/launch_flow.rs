use std::time::Duration;

use serde_json::{json, Value};

use crate::harness::{bun_like, console_message, launch, session_config, RuntimeScript, TestClient};

fn names(body: &Value, list: &str, key: &str) -> Vec<String> {
    body[list]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item[key].as_str().unwrap().to_owned())
        .collect()
}

#[tokio::test]
async fn launch_primes_the_debugger_in_order() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "let x = 1;\nconsole.log(x);\n", &[2]).await;
    client.event("stopped").await;

    let methods = mock.methods();
    assert_eq!(
        &methods[..9],
        &[
            "Inspector.enable",
            "Console.enable",
            "Debugger.enable",
            "Runtime.enable",
            "Debugger.setBreakpointsActive",
            "Debugger.setPauseOnDebuggerStatements",
            "Debugger.setPauseOnExceptions",
            "Debugger.setBreakpointByUrl",
            "Inspector.initialized",
        ]
    );
    assert_eq!(mock.calls_to("Debugger.setPauseOnExceptions"), vec![json!({"state": "uncaught"})]);

    let set = &mock.calls_to("Debugger.setBreakpointByUrl")[0];
    assert_eq!(set["lineNumber"], 2);
    assert_eq!(set["columnNumber"], 0);
    let url_regex = set["urlRegex"].as_str().unwrap();
    assert!(url_regex.contains("ferry_debug_"), "{url_regex}");
    assert!(url_regex.ends_with(r"script\.ts"), "{url_regex}");
}

#[tokio::test]
async fn entry_pause_is_invisible_and_breakpoint_stop_is_reported() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "let x = 1;\nconsole.log(x);\n", &[2]).await;

    let stopped = client.event("stopped").await;
    let body = stopped.body.unwrap();
    assert_eq!(body["reason"], "breakpoint");
    assert_eq!(body["threadId"], 1);
    assert_eq!(body["allThreadsStopped"], true);
    assert_eq!(body["line"], 2);

    // One stop only: the entry pause resumed without telling the client.
    assert_eq!(client.events_named("stopped").len(), 1);
    assert!(client.events_named("continued").is_empty());
    // Breakpoints were re-installed once the script was parsed.
    assert_eq!(mock.calls_to("Debugger.removeBreakpoint"), vec![json!({"breakpointId": "bp1"})]);
    assert_eq!(mock.calls_to("Debugger.setBreakpointByUrl").len(), 2);
}

#[tokio::test]
async fn paused_state_exposes_frames_scopes_and_variables() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "let x = 1;\nconsole.log(x);\n", &[2]).await;
    client.event("stopped").await;

    let trace = client.request("stackTrace", json!({"threadId": 1})).await;
    assert!(trace.success);
    let trace = trace.body.unwrap();
    // The runtime-internal frame is filtered out.
    assert_eq!(trace["totalFrames"], 1);
    let frame = &trace["stackFrames"][0];
    assert_eq!(frame["id"], 1);
    assert_eq!(frame["name"], "<module>");
    assert_eq!(frame["line"], 2);
    assert_eq!(frame["column"], 5);
    assert_eq!(frame["source"]["name"], "script.ts");

    let scopes = client.request("scopes", json!({"frameId": 1})).await.body.unwrap();
    assert_eq!(names(&scopes, "scopes", "name"), vec!["Local", "Global"]);
    assert_eq!(scopes["scopes"][1]["expensive"], true);
    let local = scopes["scopes"][0]["variablesReference"].as_i64().unwrap();
    assert!(local > 0);

    let variables = client
        .request("variables", json!({"variablesReference": local}))
        .await
        .body
        .unwrap();
    assert_eq!(
        names(&variables, "variables", "name"),
        vec!["x", "config", "__ferry_result__"]
    );
    let x = &variables["variables"][0];
    assert_eq!(x["value"], "1");
    assert_eq!(x["type"], "number");
    assert_eq!(x["variablesReference"], 0);

    let config = &variables["variables"][1];
    assert_eq!(config["value"], "{ retries: 3 }");
    let nested = config["variablesReference"].as_i64().unwrap();
    assert!(nested > local);

    let children = client
        .request("variables", json!({"variablesReference": nested}))
        .await
        .body
        .unwrap();
    assert_eq!(names(&children, "variables", "name"), vec!["retries"]);

    let getters = mock.calls_to("Runtime.getProperties");
    assert_eq!(getters[0]["objectId"], "scope:local");
    assert_eq!(getters[1]["objectId"], "obj:config");

    // Unknown references are empty rather than an error.
    let unknown = client.request("variables", json!({"variablesReference": 999})).await;
    assert!(unknown.success);
    assert_eq!(unknown.body.unwrap()["variables"], json!([]));
}

#[tokio::test]
async fn stack_trace_pages_frames() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "debugger;\n", &[]).await;
    client.event("stopped").await;

    let page = client
        .request("stackTrace", json!({"threadId": 1, "startFrame": 1, "levels": 5}))
        .await
        .body
        .unwrap();
    assert_eq!(page["stackFrames"], json!([]));
    assert_eq!(page["totalFrames"], 1);
}

#[tokio::test]
async fn continue_to_completion_terminates_once() {
    let mock = bun_like(RuntimeScript {
        after_continue: vec![(
            "Runtime.consoleAPICalled".to_owned(),
            json!({"type": "log", "args": [{"type": "number", "value": 1, "description": "1"}]}),
        )],
        close_after_continue: true,
        ..RuntimeScript::default()
    })
    .await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "let x = 1;\nconsole.log(x);\n", &[2]).await;
    client.event("stopped").await;

    let response = client.request("continue", json!({"threadId": 1})).await;
    assert!(response.success);
    assert_eq!(response.body.unwrap()["allThreadsContinued"], true);

    let continued = client.event("continued").await;
    assert_eq!(continued.body.unwrap()["threadId"], 1);
    client.event("terminated").await;
    client.settle(Duration::from_millis(300)).await;

    assert_eq!(client.output(), vec!["1\n"]);
    assert_eq!(client.events_named("terminated").len(), 1);
    let output_at = client
        .position(|m| m.as_event().is_some_and(|e| e.event == "output"))
        .unwrap();
    let terminated_at = client
        .position(|m| m.as_event().is_some_and(|e| e.event == "terminated"))
        .unwrap();
    assert!(output_at < terminated_at);

    // The session still answers after the runtime is gone.
    let trace = client.request("stackTrace", json!({"threadId": 1})).await;
    assert!(!trace.success);
    assert_eq!(trace.message.as_deref(), Some("program is not running"));
}

#[tokio::test]
async fn output_produced_while_stepping_follows_the_stop() {
    let mock = bun_like(RuntimeScript {
        during_step: vec![(
            "Console.messageAdded".to_owned(),
            console_message("step output", json!([])),
        )],
        ..RuntimeScript::default()
    })
    .await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "let x = 1;\nconsole.log('step output');\n", &[2]).await;
    client.event("stopped").await;

    let seq = client.send("next", json!({"threadId": 1}));
    let response = client.response(seq).await;
    assert!(response.success);

    let second_stop = client
        .wait_for("second stop", |m| {
            m.as_event().is_some_and(|e| {
                e.event == "stopped" && e.body.as_ref().is_some_and(|b| b["reason"] == "step")
            })
        })
        .await;
    assert_eq!(second_stop.as_event().unwrap().body.as_ref().unwrap()["line"], 3);
    let stop_at = client.log.len() - 1;
    client.event("output").await;

    let output_at = client
        .position(|m| m.as_event().is_some_and(|e| e.event == "output"))
        .expect("step output");
    let response_at = client
        .position(|m| m.as_response().is_some_and(|r| r.request_seq == seq))
        .unwrap();
    assert!(response_at < stop_at && stop_at < output_at, "stop at {stop_at}, output at {output_at}");
    assert_eq!(client.output(), vec!["step output\n"]);
    assert_eq!(mock.calls_to("Debugger.stepOver").len(), 1);
}

#[tokio::test]
async fn exceptions_are_reported_as_stderr_output() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "throw new Error('boom');\n", &[]).await;
    client.event("stopped").await;

    mock.push_event(
        "Runtime.exceptionThrown",
        json!({"timestamp": 1.0, "exceptionDetails": {
            "text": "Uncaught",
            "lineNumber": 1,
            "columnNumber": 6,
            "exception": {"type": "object", "subtype": "error", "description": "Error: boom"}
        }}),
    );
    let output = client.event("output").await.body.unwrap();
    assert_eq!(output["category"], "stderr");
    assert_eq!(output["output"], "Exception: Error: boom\n");
}
