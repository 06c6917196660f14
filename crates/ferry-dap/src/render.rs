//! Human-readable strings for remote values.
//!
//! Console lines, variables and evaluation results each have slightly
//! different conventions (console prints strings raw, variables quote them),
//! so each gets its own entry point over the shared preview formatting.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::remote::{ObjectPreview, PropertyPreview, RemoteObject};
use crate::script::RESULT_GLOBAL;

/// Runtime-provided globals that would drown the user's own bindings.
const HIDDEN_GLOBALS: &[&str] = &[
    "NaN", "Infinity", "undefined", "globalThis", "global", "self", "window", "console", "Bun",
    "process", "navigator", "performance", "crypto", "Loader", "onmessage", "onerror",
    "toString", "toLocaleString", "valueOf", "hasOwnProperty", "propertyIsEnumerable",
    "isPrototypeOf", "constructor", "Reflect", "JSON", "Math", "Atomics", "Intl", "WebAssembly",
    "Proxy", "Object", "Array", "Function", "Boolean", "Symbol", "Number", "BigInt", "String",
    "RegExp", "Date", "Promise", "Map", "Set", "WeakMap", "WeakSet", "Error", "TypeError",
    "RangeError", "SyntaxError", "ReferenceError", "EvalError", "URIError", "AggregateError",
    "ArrayBuffer", "DataView", "Int8Array", "Uint8Array", "Uint8ClampedArray", "Int16Array",
    "Uint16Array", "Int32Array", "Uint32Array", "Float32Array", "Float64Array",
    "BigInt64Array", "BigUint64Array", "SharedArrayBuffer",
];

fn pascal_case_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z][a-zA-Z0-9]*$").expect("pascal case regex should compile"))
}

/// A rendered value plus the remote object to expand it with, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedValue {
    pub value: String,
    pub kind: String,
    pub object_id: Option<String>,
}

impl RenderedValue {
    fn leaf(value: impl Into<String>, kind: &str) -> Self {
        Self {
            value: value.into(),
            kind: kind.to_owned(),
            object_id: None,
        }
    }
}

/// `String(value)` for a JSON primitive.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_null(object: &RemoteObject) -> bool {
    object.subtype.as_deref() == Some("null")
}

/// One property of a preview, as it appears inside `[..]` or `{ .. }`.
pub fn preview_value(prop: &PropertyPreview) -> String {
    match prop.kind.as_str() {
        "string" => format!("\"{}\"", prop.value.as_deref().unwrap_or_default()),
        "function" => "[Function]".to_owned(),
        "object" => match (&prop.value, prop.subtype.as_deref()) {
            (Some(value), _) => value.clone(),
            (None, Some("array")) => "[]".to_owned(),
            (None, _) => "{...}".to_owned(),
        },
        kind => prop.value.clone().unwrap_or_else(|| kind.to_owned()),
    }
}

/// `[a, b]` for arrays, `{ k: v }` for everything else.
pub fn object_preview(preview: &ObjectPreview) -> String {
    let more = if preview.overflow { ", ..." } else { "" };
    if preview.subtype.as_deref() == Some("array") {
        let items: Vec<String> = preview.properties.iter().map(preview_value).collect();
        return format!("[{}{more}]", items.join(", "));
    }
    let props: Vec<String> = preview
        .properties
        .iter()
        .map(|prop| format!("{}: {}", prop.name, preview_value(prop)))
        .collect();
    if props.is_empty() && !preview.overflow {
        return "{}".to_owned();
    }
    format!("{{ {}{more} }}", props.join(", "))
}

/// One `console.*` argument.
pub fn console_argument(object: &RemoteObject) -> String {
    if is_null(object) {
        return "null".to_owned();
    }
    if object.kind == "undefined" {
        return "undefined".to_owned();
    }
    if let Some(value) = &object.value {
        return plain(value);
    }
    match object.kind.as_str() {
        "object" => match &object.preview {
            Some(preview) => object_preview(preview),
            None => object.description.clone().unwrap_or_else(|| "Object".to_owned()),
        },
        "function" => object
            .description
            .clone()
            .unwrap_or_else(|| "[Function]".to_owned()),
        kind => object.description.clone().unwrap_or_else(|| kind.to_owned()),
    }
}

/// The text of a console message: its arguments joined by spaces, or the
/// runtime's own text when it sent no arguments.
pub fn console_line(args: &[RemoteObject], text: &str) -> String {
    if args.is_empty() {
        return text.to_owned();
    }
    args.iter().map(console_argument).collect::<Vec<_>>().join(" ")
}

/// Whether a property is noise in the variables view.
pub fn is_hidden_property(name: &str, value: &RemoteObject) -> bool {
    if name.starts_with("__") && name != RESULT_GLOBAL {
        return true;
    }
    if HIDDEN_GLOBALS.contains(&name) {
        return true;
    }
    value.kind == "function"
        && (value
            .description
            .as_deref()
            .is_some_and(|d| d.contains("[native code]"))
            || pascal_case_regex().is_match(name))
}

/// A value in the variables view.
pub fn variable_value(object: &RemoteObject) -> RenderedValue {
    if is_null(object) {
        return RenderedValue::leaf("null", "object");
    }
    if object.kind == "object" {
        // Boxed primitives read like their primitive.
        match object.class_name.as_deref() {
            Some("String") => {
                let text = object.description.as_deref().unwrap_or_default();
                return RenderedValue::leaf(format!("\"{text}\""), "string");
            }
            Some(class @ ("Number" | "Boolean")) => {
                let text = object.description.clone().unwrap_or_default();
                return RenderedValue::leaf(text, &class.to_ascii_lowercase());
            }
            _ => {}
        }
        if let Some(object_id) = &object.object_id {
            let value = match (&object.preview, &object.description) {
                (Some(preview), _) => object_preview(preview),
                (None, Some(description)) => description.clone(),
                (None, None) => format!(
                    "[{}]",
                    object
                        .subtype
                        .as_deref()
                        .or(object.class_name.as_deref())
                        .unwrap_or("Object")
                ),
            };
            return RenderedValue {
                value,
                kind: object.kind.clone(),
                object_id: Some(object_id.clone()),
            };
        }
    }
    leaf_value(object)
}

fn leaf_value(object: &RemoteObject) -> RenderedValue {
    match &object.value {
        Some(value) => RenderedValue::leaf(value.to_string(), &object.kind),
        None => RenderedValue::leaf(
            object
                .description
                .clone()
                .unwrap_or_else(|| object.kind.clone()),
            &object.kind,
        ),
    }
}

/// The result of an `evaluate` request.
///
/// Promises are summarised from their preview so an awaited expression shows
/// its settled value.
pub fn evaluation_value(object: &RemoteObject) -> RenderedValue {
    let is_promise = object.subtype.as_deref() == Some("promise")
        || object.class_name.as_deref() == Some("Promise");
    if is_promise {
        if let Some(summary) = object.preview.as_ref().and_then(promise_summary) {
            return RenderedValue::leaf(summary, "object");
        }
    }

    if object.kind == "undefined" {
        return RenderedValue::leaf("undefined", "undefined");
    }
    if is_null(object) {
        return RenderedValue::leaf("null", "object");
    }
    if object.value.is_some() {
        return leaf_value(object);
    }
    if let Some(object_id) = &object.object_id {
        let value = match &object.preview {
            Some(preview) => object_preview(preview),
            None => object
                .description
                .clone()
                .unwrap_or_else(|| object.kind.clone()),
        };
        return RenderedValue {
            value,
            kind: object.kind.clone(),
            object_id: Some(object_id.clone()),
        };
    }
    leaf_value(object)
}

fn promise_summary(preview: &ObjectPreview) -> Option<String> {
    let status = preview.property("status")?.value.as_deref()?;
    let result = preview.property("result");
    let settled = || match result {
        Some(PropertyPreview {
            value: Some(value), ..
        }) => value.clone(),
        Some(PropertyPreview {
            value_preview: Some(nested),
            ..
        }) => object_preview(nested),
        Some(prop) => prop
            .subtype
            .as_ref()
            .map_or_else(|| "[Object]".to_owned(), |subtype| format!("[{subtype}]")),
        None => "undefined".to_owned(),
    };
    match status {
        "fulfilled" => Some(settled()),
        "rejected" => Some(format!("Rejected: {}", settled())),
        "pending" => Some("Promise { <pending> }".to_owned()),
        _ => None,
    }
}
