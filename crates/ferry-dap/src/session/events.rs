use ferry_inspector::InspectorEvent;
use ferry_process::ProcessEvent;
use serde_json::json;

use super::{DebugSession, SessionState, THREAD_ID};
use crate::remote::{self, ConsoleApiCalled, ConsoleMessage, ExceptionThrown, MessageAdded, Paused, ScriptParsed};
use crate::render;
use crate::script;
use crate::sourcemap::LineMapping;

/// DAP `stopped` reason for an inspector pause reason.
fn stop_reason(reason: &str) -> &'static str {
    match reason {
        "Breakpoint" | "breakpoint" | "DebuggerStatement" => "breakpoint",
        "step" => "step",
        "exception" | "Exception" | "promiseRejection" => "exception",
        "debugCommand" => "pause",
        _ => "step",
    }
}

fn file_name(url: &str) -> &str {
    url.rsplit(['/', '\\']).next().unwrap_or(url)
}

impl DebugSession {
    pub(super) async fn handle_inspector_event(&mut self, event: InspectorEvent) {
        let (method, params) = match event {
            InspectorEvent::Closed => {
                tracing::info!(target: "ferry.inspector", "inspector connection closed");
                self.teardown();
                self.send_terminated();
                return;
            }
            InspectorEvent::Notification { method, params } => (method, params),
        };

        match method.as_str() {
            "Debugger.scriptParsed" => self.on_script_parsed(remote::decode(&method, params)),
            "Debugger.paused" => self.on_paused(remote::decode(&method, params)).await,
            "Debugger.resumed" => self.on_resumed(),
            "Console.messageAdded" => {
                let added: MessageAdded = remote::decode(&method, params);
                self.on_console_message(added.message);
            }
            "Runtime.consoleAPICalled" => self.on_console_api_called(remote::decode(&method, params)),
            "Runtime.exceptionThrown" => {
                let thrown: ExceptionThrown = remote::decode(&method, params);
                let output = format!("Exception: {}\n", thrown.exception_details.summary());
                self.emit_output(json!({"category": "stderr", "output": output}));
            }
            "Debugger.breakpointResolved" => {
                tracing::debug!(target: "ferry.inspector", %params, "breakpoint resolved");
            }
            other => {
                tracing::trace!(target: "ferry.inspector", method = other, "ignoring inspector event");
            }
        }
    }

    pub(super) fn handle_process_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Output { line } => {
                self.emit_output(json!({"category": "stderr", "output": format!("{line}\n")}));
            }
            ProcessEvent::Exited { code } => {
                tracing::info!(target: "ferry.process", ?code, "runtime exited");
                self.process_events = None;
                self.teardown();
                self.send_terminated();
            }
        }
    }

    fn on_script_parsed(&mut self, parsed: ScriptParsed) {
        let is_main = self
            .runtime
            .as_ref()
            .is_some_and(|runtime| runtime.is_script(&parsed.url));
        tracing::trace!(target: "ferry.inspector", script_id = %parsed.script_id, url = %parsed.url, "script parsed");

        if is_main {
            self.main_script_id = Some(parsed.script_id.clone());
            match parsed.source_map_url.as_deref().filter(|url| !url.is_empty()) {
                Some(url) => match LineMapping::from_data_url(url) {
                    Ok(mapping) => {
                        tracing::debug!(target: "ferry.dap", script_id = %parsed.script_id, "source map loaded");
                        self.mapping = mapping;
                    }
                    Err(err) => {
                        tracing::warn!(target: "ferry.dap", error = %err, "ignoring unreadable source map");
                    }
                },
                None => tracing::debug!(target: "ferry.dap", "script has no source map"),
            }
        }
        self.scripts.insert(parsed.script_id, parsed.url);
    }

    async fn on_paused(&mut self, paused: Paused) {
        let top_line = paused
            .call_frames
            .first()
            .map(|frame| frame.location.line_number);

        if self.entry_pause
            && !self.initial_pause_done
            && paused.reason == "DebuggerStatement"
            && top_line == Some(0)
        {
            // The injected entry pause: breakpoints can now be placed on the
            // parsed script, then execution continues invisibly.
            self.initial_pause_done = true;
            self.apply_breakpoints().await;
            if let Ok(inspector) = self.inspector() {
                self.suppress_resumed = true;
                if let Err(err) = inspector.call("Debugger.resume", json!({})).await {
                    self.suppress_resumed = false;
                    tracing::warn!(target: "ferry.dap", error = %err, "failed to leave entry pause");
                }
            }
            return;
        }
        self.initial_pause_done = true;

        self.refs.clear();
        self.call_frames = paused.call_frames;
        self.state = SessionState::Paused;

        let mut body = json!({
            "reason": stop_reason(&paused.reason),
            "threadId": THREAD_ID,
            "allThreadsStopped": true,
        });
        if let Some(line) = top_line {
            body["line"] = json!(self.client_line(line));
        }
        tracing::debug!(target: "ferry.dap", reason = %paused.reason, "paused");

        // Output held back during a step follows the stop it led up to.
        self.stepping = false;
        self.send_event("stopped", Some(body));
        self.flush_output();
    }

    fn on_resumed(&mut self) {
        self.refs.clear();
        self.call_frames.clear();
        if self.state != SessionState::Terminated {
            self.state = SessionState::Running;
        }
        if std::mem::take(&mut self.suppress_resumed) {
            return;
        }
        self.send_event(
            "continued",
            Some(json!({"threadId": THREAD_ID, "allThreadsContinued": true})),
        );
    }

    fn on_console_message(&mut self, message: ConsoleMessage) {
        let text = render::console_line(&message.parameters, &message.text);
        if self.capture_result(&text) {
            return;
        }

        let category = match message.level.as_str() {
            "error" | "warning" => "stderr",
            _ => "stdout",
        };
        let mut body = json!({"category": category, "output": format!("{text}\n")});
        if let (Some(url), Some(line)) = (message.url.as_deref(), message.line) {
            if !url.is_empty() {
                body["source"] = json!({"path": url, "name": file_name(url)});
                body["line"] = json!(line);
                if let Some(column) = message.column {
                    body["column"] = json!(column + 1);
                }
            }
        }
        self.emit_output(body);
    }

    fn on_console_api_called(&mut self, called: ConsoleApiCalled) {
        let text = render::console_line(&called.args, "");
        if self.capture_result(&text) {
            return;
        }
        let category = match called.kind.as_str() {
            "error" | "warning" | "assert" => "stderr",
            _ => "stdout",
        };
        self.emit_output(json!({"category": category, "output": format!("{text}\n")}));
    }

    /// Consume the result line printed by the `main` trailer.
    fn capture_result(&mut self, text: &str) -> bool {
        let Some(parsed) = script::parse_result_line(text) else {
            return false;
        };
        match parsed {
            Ok(result) => {
                tracing::info!(target: "ferry.dap", "script result captured");
                self.result = Some(result);
                self.send_terminated();
            }
            Err(err) => {
                tracing::warn!(target: "ferry.dap", error = %err, "unreadable script result");
            }
        }
        true
    }
}
