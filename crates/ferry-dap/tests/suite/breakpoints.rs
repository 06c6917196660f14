use serde_json::json;
use tempfile::TempDir;

use std::time::Duration;

use crate::harness::{
    bun_like, launch, runtime_env, session_config, source_map_url, RuntimeScript, TestClient,
};

#[tokio::test]
async fn breakpoint_ids_are_unique_for_the_session() {
    let mut client = TestClient::start(session_config());
    client.initialize().await;

    let first = client
        .request(
            "setBreakpoints",
            json!({"source": {"path": "/w/script.ts"}, "breakpoints": [{"line": 4}, {"line": 9}]}),
        )
        .await
        .body
        .unwrap();
    assert_eq!(first["breakpoints"][0]["id"], 1);
    assert_eq!(first["breakpoints"][1]["id"], 2);
    assert_eq!(first["breakpoints"][1]["line"], 9);
    assert_eq!(first["breakpoints"][1]["verified"], true);

    let second = client
        .request("setBreakpoints", json!({"source": {"path": "/w/script.ts"}, "lines": [4]}))
        .await
        .body
        .unwrap();
    assert_eq!(second["breakpoints"][0]["id"], 3);
    assert_eq!(second["breakpoints"][0]["source"]["path"], "/w/script.ts");

    let cleared = client
        .request("setBreakpoints", json!({"source": {"path": "/w/script.ts"}, "breakpoints": []}))
        .await
        .body
        .unwrap();
    assert_eq!(cleared["breakpoints"], json!([]));
}

#[tokio::test]
async fn source_map_translates_lines_both_ways() {
    // Original line 3 was emitted as transpiled line 2.
    let mock = bun_like(RuntimeScript {
        source_map: Some(source_map_url("AAAA;AACA;AACA,EACA")),
        pause_line: 2,
        ..RuntimeScript::default()
    })
    .await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "type T = number;\nconst a: T = 1;\nconsole.log(a);\n", &[3]).await;

    let stopped = client.event("stopped").await;
    assert_eq!(stopped.body.unwrap()["line"], 3);

    let lines: Vec<_> = mock
        .calls_to("Debugger.setBreakpointByUrl")
        .iter()
        .map(|params| params["lineNumber"].clone())
        .collect();
    // Installed before the map was known, then re-installed through it.
    assert_eq!(lines, vec![json!(3), json!(2)]);

    let trace = client.request("stackTrace", json!({"threadId": 1})).await.body.unwrap();
    assert_eq!(trace["stackFrames"][0]["line"], 3);
}

#[tokio::test]
async fn dependency_with_a_similar_name_keeps_the_script_mapping() {
    let mock = bun_like(RuntimeScript {
        source_map: Some(source_map_url("AAAA;AACA;AACA,EACA")),
        ..RuntimeScript::default()
    })
    .await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "type T = number;\nconst a: T = 1;\nconsole.log(a);\n", &[]).await;
    client.event("stopped").await;

    mock.push_event(
        "Debugger.scriptParsed",
        json!({
            "scriptId": "9",
            "url": "file:///w/node_modules/lib/typescript.ts",
            "sourceMapURL": source_map_url("AAAA;AACA;AACA;AACA"),
        }),
    );
    client.settle(Duration::from_millis(200)).await;

    let response = client
        .request(
            "setBreakpoints",
            json!({"source": {"path": "/workspace/script.ts"}, "breakpoints": [{"line": 3}]}),
        )
        .await;
    assert!(response.success);
    let set = mock.calls_to("Debugger.setBreakpointByUrl");
    assert_eq!(set.last().unwrap()["lineNumber"], 2);
    assert!(!set.last().unwrap()["urlRegex"].as_str().unwrap().contains("node_modules"));

    let trace = client.request("stackTrace", json!({"threadId": 1})).await.body.unwrap();
    assert_eq!(trace["stackFrames"][0]["line"], 3);
}

#[tokio::test]
async fn changing_breakpoints_while_running_replaces_installed_ones() {
    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    launch(&mut client, &mock, "let a = 1;\nlet b = 2;\nlet c = 3;\n", &[2]).await;
    client.event("stopped").await;

    let response = client
        .request(
            "setBreakpoints",
            json!({"source": {"path": "/workspace/script.ts"}, "breakpoints": [{"line": 3}, {"line": 1}, {"line": 3}]}),
        )
        .await;
    assert!(response.success);
    assert_eq!(response.body.unwrap()["breakpoints"].as_array().unwrap().len(), 3);

    let removed = mock.calls_to("Debugger.removeBreakpoint");
    assert_eq!(removed.last().unwrap(), &json!({"breakpointId": "bp2"}));
    let set = mock.calls_to("Debugger.setBreakpointByUrl");
    let lines: Vec<_> = set[2..].iter().map(|p| p["lineNumber"].clone()).collect();
    // Sorted and deduplicated.
    assert_eq!(lines, vec![json!(1), json!(3)]);
}

#[tokio::test]
async fn program_launch_reports_one_based_lines() {
    let dir = TempDir::new().unwrap();
    let program = dir.path().join("script.ts");
    std::fs::write(&program, "console.log('hi');\n").unwrap();

    let mock = bun_like(RuntimeScript::default()).await;
    let mut client = TestClient::start(session_config());
    client.initialize().await;
    client
        .request(
            "setBreakpoints",
            json!({"source": {"path": program}, "breakpoints": [{"line": 5}]}),
        )
        .await;
    let response = client
        .request(
            "launch",
            json!({
                "program": program,
                "env": runtime_env(&mock),
            }),
        )
        .await;
    assert!(response.success, "{:?}", response.message);

    // No injected entry pause: the runtime's first stop is shown as is.
    let stopped = client.event("stopped").await;
    assert_eq!(stopped.body.unwrap()["line"], 1);
    assert_eq!(mock.calls_to("Debugger.setBreakpointByUrl")[0]["lineNumber"], 4);
    assert!(mock.calls_to("Debugger.resume").is_empty());

    // The program file is the client's own and stays on disk.
    client.request("terminate", json!({})).await;
    assert!(program.exists());
}
