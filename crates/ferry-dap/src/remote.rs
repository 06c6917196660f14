//! Typed views of the inspector payloads the session consumes.
//!
//! Only the fields the bridge reads are modelled; everything defaults so a
//! runtime that omits a field does not break decoding.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: Option<String>,
    pub class_name: Option<String>,
    pub value: Option<Value>,
    pub description: Option<String>,
    pub object_id: Option<String>,
    pub preview: Option<ObjectPreview>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectPreview {
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: Option<String>,
    pub description: Option<String>,
    pub overflow: bool,
    pub properties: Vec<PropertyPreview>,
}

impl ObjectPreview {
    pub fn property(&self, name: &str) -> Option<&PropertyPreview> {
        self.properties.iter().find(|prop| prop.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertyPreview {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: Option<String>,
    pub value: Option<String>,
    pub value_preview: Option<ObjectPreview>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Location {
    pub script_id: String,
    pub line_number: u32,
    pub column_number: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scope {
    #[serde(rename = "type")]
    pub kind: String,
    pub object: RemoteObject,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallFrame {
    pub call_frame_id: String,
    pub function_name: String,
    pub location: Location,
    pub scope_chain: Vec<Scope>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Paused {
    pub call_frames: Vec<CallFrame>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptParsed {
    pub script_id: String,
    pub url: String,
    #[serde(rename = "sourceMapURL")]
    pub source_map_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertyDescriptor {
    pub name: String,
    pub value: Option<RemoteObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GetPropertiesResult {
    pub result: Vec<PropertyDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluateResult {
    pub result: RemoteObject,
    pub exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsoleMessage {
    pub source: String,
    pub level: String,
    pub text: String,
    pub url: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub parameters: Vec<RemoteObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MessageAdded {
    pub message: ConsoleMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConsoleApiCalled {
    #[serde(rename = "type")]
    pub kind: String,
    pub args: Vec<RemoteObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExceptionDetails {
    pub text: String,
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    pub fn summary(&self) -> &str {
        self.exception
            .as_ref()
            .and_then(|exception| exception.description.as_deref())
            .or_else(|| (!self.text.is_empty()).then_some(self.text.as_str()))
            .unwrap_or("Unknown exception")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExceptionThrown {
    pub exception_details: ExceptionDetails,
}

/// Decode event params, falling back to defaults for unexpected shapes.
pub fn decode<T: serde::de::DeserializeOwned + Default>(method: &str, params: Value) -> T {
    serde_json::from_value(params).unwrap_or_else(|err| {
        tracing::warn!(target: "ferry.inspector", method, error = %err, "unexpected inspector payload");
        T::default()
    })
}
