use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{DebugSession, Flow, ScopeRef, SessionState, THREAD_ID};
use crate::dap::codec::describe_json_error;
use crate::dap::Request;
use crate::error::{RequestError, RequestResult};
use crate::remote::{EvaluateResult, GetPropertiesResult};
use crate::render;

/// Requests the bridge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Initialize,
    SetBreakpoints,
    ConfigurationDone,
    Launch,
    Threads,
    StackTrace,
    Scopes,
    Variables,
    Evaluate,
    Continue,
    Next,
    StepIn,
    StepOut,
    Pause,
    Disconnect,
    Terminate,
}

impl Command {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "initialize" => Command::Initialize,
            "setBreakpoints" => Command::SetBreakpoints,
            "configurationDone" => Command::ConfigurationDone,
            "launch" => Command::Launch,
            "threads" => Command::Threads,
            "stackTrace" => Command::StackTrace,
            "scopes" => Command::Scopes,
            "variables" => Command::Variables,
            "evaluate" => Command::Evaluate,
            "continue" => Command::Continue,
            "next" => Command::Next,
            "stepIn" => Command::StepIn,
            "stepOut" => Command::StepOut,
            "pause" => Command::Pause,
            "disconnect" => Command::Disconnect,
            "terminate" => Command::Terminate,
            _ => return None,
        })
    }
}

fn capabilities() -> Value {
    json!({
        "supportsConfigurationDoneRequest": true,
        "supportsFunctionBreakpoints": false,
        "supportsConditionalBreakpoints": false,
        "supportsHitConditionalBreakpoints": false,
        "supportsEvaluateForHovers": true,
        "exceptionBreakpointFilters": [],
        "supportsStepBack": false,
        "supportsSetVariable": false,
        "supportsRestartFrame": false,
        "supportsGotoTargetsRequest": false,
        "supportsStepInTargetsRequest": false,
        "supportsCompletionsRequest": false,
        "supportsModulesRequest": false,
        "supportsExceptionOptions": false,
        "supportsValueFormattingOptions": false,
        "supportsExceptionInfoRequest": false,
        "supportTerminateDebuggee": true,
        "supportsDelayedStackTraceLoading": false,
        "supportsLoadedSourcesRequest": false,
        "supportsLogPoints": false,
        "supportsTerminateThreadsRequest": false,
        "supportsSetExpression": false,
        "supportsTerminateRequest": true,
        "supportsDataBreakpoints": false,
        "supportsReadMemoryRequest": false,
        "supportsDisassembleRequest": false,
        "supportsCancelRequest": false,
        "supportsBreakpointLocationsRequest": false,
    })
}

fn leading_await_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*await\s+").expect("await regex should compile"))
}

fn arguments<T: DeserializeOwned>(request: &Request, command: &'static str) -> RequestResult<T> {
    request
        .arguments()
        .map_err(|err| RequestError::InvalidArguments {
            command,
            message: describe_json_error(&err),
        })
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Source {
    path: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SourceBreakpoint {
    line: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SetBreakpointsArguments {
    source: Source,
    breakpoints: Option<Vec<SourceBreakpoint>>,
    /// Deprecated form some clients still send.
    lines: Option<Vec<u32>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StackTraceArguments {
    start_frame: Option<usize>,
    levels: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ScopesArguments {
    frame_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VariablesArguments {
    variables_reference: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EvaluateArguments {
    expression: String,
    frame_id: Option<i64>,
    token: Option<String>,
}

impl DebugSession {
    pub(super) async fn handle_request(&mut self, request: Request) -> Flow {
        let Some(command) = Command::parse(&request.command) else {
            tracing::debug!(target: "ferry.dap", command = %request.command, "unsupported request");
            let message = RequestError::Unsupported(request.command.clone()).to_string();
            self.respond_error(&request, message);
            return Flow::Continue;
        };
        tracing::debug!(target: "ferry.dap", seq = request.seq, command = %request.command, "request");

        let result = match command {
            Command::Initialize => {
                self.initialize(&request);
                return Flow::Continue;
            }
            Command::Launch => {
                self.launch(&request).await;
                return Flow::Continue;
            }
            Command::Terminate => {
                self.terminate(&request);
                return Flow::Continue;
            }
            Command::Disconnect => {
                self.disconnect(&request);
                return Flow::Stop;
            }
            Command::SetBreakpoints => self.set_breakpoints(&request).await,
            Command::ConfigurationDone => {
                self.configuration_done = true;
                Ok(None)
            }
            Command::Threads => Ok(Some(json!({
                "threads": [{"id": THREAD_ID, "name": "MainThread"}]
            }))),
            Command::StackTrace => self.stack_trace(&request),
            Command::Scopes => self.scopes(&request),
            Command::Variables => self.variables(&request).await,
            Command::Evaluate => self.evaluate(&request).await,
            Command::Continue => self
                .resume_with("Debugger.resume")
                .await
                .map(|()| Some(json!({"allThreadsContinued": true}))),
            Command::Next => self.resume_with("Debugger.stepOver").await.map(|()| None),
            Command::StepIn => self.resume_with("Debugger.stepInto").await.map(|()| None),
            Command::StepOut => self.resume_with("Debugger.stepOut").await.map(|()| None),
            Command::Pause => self.resume_with("Debugger.pause").await.map(|()| None),
        };

        match result {
            Ok(body) => self.respond(&request, body),
            Err(err) => self.respond_error(&request, err.to_string()),
        }
        Flow::Continue
    }

    fn initialize(&mut self, request: &Request) {
        self.state = SessionState::Initializing;
        self.respond(request, Some(capabilities()));
        self.send_event("initialized", None);
        self.state = SessionState::Configuring;
    }

    async fn set_breakpoints(&mut self, request: &Request) -> RequestResult<Option<Value>> {
        let args: SetBreakpointsArguments = arguments(request, "setBreakpoints")?;
        let path = args
            .source
            .path
            .or(args.source.name)
            .unwrap_or_default();
        let lines: Vec<u32> = match (args.breakpoints, args.lines) {
            (Some(breakpoints), _) => breakpoints.iter().map(|bp| bp.line).collect(),
            (None, Some(lines)) => lines,
            (None, None) => Vec::new(),
        };

        if lines.is_empty() {
            self.breakpoints.remove(&path);
        } else {
            self.breakpoints.insert(path.clone(), lines.clone());
        }
        if self.runtime.is_some() {
            self.apply_breakpoints().await;
        }

        let breakpoints: Vec<Value> = lines
            .iter()
            .map(|&line| {
                let id = self.next_breakpoint_id;
                self.next_breakpoint_id += 1;
                json!({"id": id, "verified": true, "line": line, "source": {"path": path}})
            })
            .collect();
        Ok(Some(json!({ "breakpoints": breakpoints })))
    }

    fn stack_trace(&mut self, request: &Request) -> RequestResult<Option<Value>> {
        self.inspector()?;
        let args: StackTraceArguments = arguments(request, "stackTrace")?;
        let Some(runtime) = &self.runtime else {
            return Err(RequestError::NotRunning);
        };

        let frames: Vec<Value> = self
            .call_frames
            .iter()
            .enumerate()
            .filter_map(|(index, frame)| {
                let url = self.scripts.get(&frame.location.script_id)?;
                if !runtime.is_script(url) {
                    return None;
                }
                let name = if frame.function_name.is_empty() {
                    "<module>"
                } else {
                    frame.function_name.as_str()
                };
                Some(json!({
                    "id": index + 1,
                    "name": name,
                    "source": {"path": url, "name": file_name(url)},
                    "line": self.client_line(frame.location.line_number),
                    "column": frame.location.column_number + 1,
                }))
            })
            .collect();

        let total = frames.len();
        let start = args.start_frame.unwrap_or(0).min(total);
        let end = match args.levels {
            Some(levels) if levels > 0 => start.saturating_add(levels).min(total),
            _ => total,
        };
        Ok(Some(json!({
            "stackFrames": &frames[start..end],
            "totalFrames": total,
        })))
    }

    fn scopes(&mut self, request: &Request) -> RequestResult<Option<Value>> {
        self.inspector()?;
        let args: ScopesArguments = arguments(request, "scopes")?;
        let frame_index = usize::try_from(args.frame_id.unwrap_or(1) - 1).ok();
        let Some(frame) = frame_index.and_then(|index| self.call_frames.get(index)) else {
            return Ok(Some(json!({"scopes": []})));
        };
        let frame_index = frame_index.unwrap_or_default();

        let mut scopes = Vec::new();
        for scope in frame.scope_chain.clone() {
            let Some(object_id) = scope.object.object_id else {
                continue;
            };
            let name = scope
                .name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| capitalize(&scope.kind));
            let expensive = scope.kind == "global";
            let reference = self.refs.add_scope(ScopeRef {
                kind: scope.kind,
                object_id,
                frame_index,
            });
            scopes.push(json!({
                "name": name,
                "variablesReference": reference,
                "expensive": expensive,
            }));
        }
        Ok(Some(json!({ "scopes": scopes })))
    }

    async fn variables(&mut self, request: &Request) -> RequestResult<Option<Value>> {
        let inspector = self.inspector()?;
        let args: VariablesArguments = arguments(request, "variables")?;
        let Some(object_id) = self
            .refs
            .object_id(args.variables_reference)
            .map(str::to_owned)
        else {
            return Ok(Some(json!({"variables": []})));
        };

        let result = inspector
            .call(
                "Runtime.getProperties",
                json!({"objectId": object_id, "ownProperties": true, "generatePreview": true}),
            )
            .await?;
        let properties: GetPropertiesResult = crate::remote::decode("Runtime.getProperties", result);

        let mut variables = Vec::new();
        for property in properties.result {
            let Some(value) = property.value else {
                continue;
            };
            if render::is_hidden_property(&property.name, &value) {
                continue;
            }
            let rendered = render::variable_value(&value);
            let reference = rendered
                .object_id
                .map_or(0, |object_id| self.refs.add_object(object_id));
            variables.push(json!({
                "name": property.name,
                "value": rendered.value,
                "type": rendered.kind,
                "variablesReference": reference,
            }));
        }
        Ok(Some(json!({ "variables": variables })))
    }

    async fn evaluate(&mut self, request: &Request) -> RequestResult<Option<Value>> {
        let inspector = self.inspector()?;
        let args: EvaluateArguments = arguments(request, "evaluate")?;
        self.config
            .verifier
            .audit_expression(args.token.as_deref(), &args.expression)
            .await;

        let expression = leading_await_regex()
            .replace(&args.expression, "")
            .into_owned();
        let frame = args
            .frame_id
            .and_then(|id| usize::try_from(id - 1).ok())
            .and_then(|index| self.call_frames.get(index));

        let (method, params) = match frame {
            Some(frame) => (
                "Debugger.evaluateOnCallFrame",
                json!({
                    "callFrameId": frame.call_frame_id,
                    "expression": expression,
                    "returnByValue": false,
                    "generatePreview": true,
                }),
            ),
            None => (
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": false,
                    "generatePreview": true,
                }),
            ),
        };
        let result = inspector.call(method, params).await?;
        let evaluated: EvaluateResult = crate::remote::decode(method, result);

        let rendered = render::evaluation_value(&evaluated.result);
        let reference = rendered
            .object_id
            .map_or(0, |object_id| self.refs.add_object(object_id));
        Ok(Some(json!({
            "result": rendered.value,
            "type": rendered.kind,
            "variablesReference": reference,
        })))
    }

    /// Resume-style commands: output is held back until the next stop.
    async fn resume_with(&mut self, method: &str) -> RequestResult<()> {
        let inspector = self.inspector()?;
        self.stepping = true;
        if let Err(err) = inspector.call(method, json!({})).await {
            self.stepping = false;
            self.flush_output();
            return Err(err.into());
        }
        Ok(())
    }

    fn terminate(&mut self, request: &Request) {
        tracing::info!(target: "ferry.dap", "terminate requested");
        self.teardown();
        self.respond(request, None);
        if self.launched {
            self.send_terminated();
        }
    }

    fn disconnect(&mut self, request: &Request) {
        tracing::info!(target: "ferry.dap", "disconnect requested");
        self.teardown();
        self.respond(request, None);
        if self.launched {
            self.send_terminated();
        }
    }
}
