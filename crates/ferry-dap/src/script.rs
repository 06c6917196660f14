//! Rewrites the client's source into the file the runtime actually runs.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Prefix of the console line that carries `main`'s JSON-encoded result.
pub const RESULT_SENTINEL: &str = "__FERRY_RESULT__:";

/// Global the trailer stores the result in; visible in the variables view.
pub const RESULT_GLOBAL: &str = "__ferry_result__";

/// File name of the rewritten script inside its temporary directory.
pub const SCRIPT_FILE_NAME: &str = "script.ts";

const ENTRY_PAUSE: &str = "debugger; // paused by ferry before the first user line\n";

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:import|export).*?from\s+['"]([^'"]+)['"]"#)
            .expect("import regex should compile")
    })
}

fn pinned_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^((?:@[^/@]+/[^/@]+)|(?:[^/@]+))(?:@[^/]+)?(.*)$")
            .expect("pinned import regex should compile")
    })
}

/// Strip version pins from import specifiers: `lodash@4.17.21` becomes
/// `lodash`, `@scope/pkg@1.2.3/sub` becomes `@scope/pkg/sub`.
///
/// Relative and absolute paths are never touched. Longer specifiers are
/// replaced first so a short one cannot clobber part of a longer one.
pub fn remove_pinned_imports(code: &str) -> String {
    let mut specifiers: Vec<&str> = import_regex()
        .captures_iter(code)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|spec| !spec.starts_with('.') && !spec.starts_with('/'))
        .collect();
    specifiers.sort_by(|a, b| b.len().cmp(&a.len()));
    specifiers.dedup();

    let mut rewritten = code.to_owned();
    for specifier in specifiers {
        let Some(caps) = pinned_regex().captures(specifier) else {
            continue;
        };
        let package = caps.get(1).map_or("", |m| m.as_str());
        let rest = caps.get(2).map_or("", |m| m.as_str());
        let unpinned = format!("{package}{rest}");
        if unpinned == specifier {
            continue;
        }
        for quote in ['"', '\''] {
            rewritten = rewritten.replace(
                &format!("{quote}{specifier}{quote}"),
                &format!("{quote}{unpinned}{quote}"),
            );
        }
    }
    rewritten
}

/// Code that calls `main` with the launch arguments and reports the result.
///
/// Arguments are passed positionally in the order the client listed them.
pub fn main_trailer(args: &Map<String, Value>) -> String {
    let call_args = args
        .values()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "\n\n// ferry: invoke main\n\
globalThis.{RESULT_GLOBAL} = await main({call_args});\n\
console.log(\"{RESULT_SENTINEL}\" + JSON.stringify(globalThis.{RESULT_GLOBAL}));\n\
await new Promise((resolve) => setTimeout(resolve, 50));\n"
    )
}

/// The script written to disk for a code launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedScript {
    pub source: String,
}

impl PreparedScript {
    /// Pins removed, entry pause injected as line 0, trailer appended when
    /// `call_main` is set.
    ///
    /// The injected line shifts the user's code down by one, so a 1-based
    /// client line `N` is 0-based line `N` of this file.
    pub fn new(code: &str, call_main: bool, args: &Map<String, Value>) -> Self {
        let mut source = String::with_capacity(code.len() + ENTRY_PAUSE.len() + 256);
        source.push_str(ENTRY_PAUSE);
        source.push_str(&remove_pinned_imports(code));
        if call_main {
            source.push_str(&main_trailer(args));
        }
        Self { source }
    }
}

/// Parse a console line carrying the script result, if it is one.
pub fn parse_result_line(line: &str) -> Option<Result<Value, serde_json::Error>> {
    let payload = line.strip_prefix(RESULT_SENTINEL)?;
    Some(serde_json::from_str(payload.trim_end()))
}
