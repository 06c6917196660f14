//! Service configuration for the Ferry debug bridge.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `DAP_*` environment variables, then command-line flags (applied by the
//! binary). Every section uses `#[serde(default)]` so partial files are fine.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use url::Url;

/// Environment variable consulted for a config file path when `--config` is absent.
pub const CONFIG_PATH_ENV: &str = "FERRY_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid value for {name}: {message}")]
    InvalidEnv { name: &'static str, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(sanitize_toml_error_message(&err.to_string()))
    }
}

fn sanitize_toml_error_message(message: &str) -> String {
    // TOML diagnostics echo scalar values back (`invalid type: string "secret"`),
    // and config files can carry URLs with credentials.
    static QUOTED_STRING_RE: OnceLock<regex::Regex> = OnceLock::new();
    static SINGLE_QUOTED_STRING_RE: OnceLock<regex::Regex> = OnceLock::new();

    let quoted = QUOTED_STRING_RE.get_or_init(|| {
        regex::Regex::new(r#""(?:\\.|[^"\\])*""#).expect("quoted-string regex should compile")
    });
    let single = SINGLE_QUOTED_STRING_RE.get_or_init(|| {
        regex::Regex::new(r"'(?:\\.|[^'\\])*'").expect("single-quoted regex should compile")
    });

    let out = quoted.replace_all(message, r#""<redacted>""#);
    single.replace_all(&out, "'<redacted>'").into_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3003,
        }
    }
}

/// Target script runtime and the timeouts that bound talking to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub path: PathBuf,
    /// Loopback address the runtime's inspector listens on.
    pub inspect_host: String,
    pub discovery_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("bun"),
            inspect_host: "127.0.0.1".to_owned(),
            discovery_timeout_ms: 10_000,
            call_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl RuntimeConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub binary_path: PathBuf,
    /// Policy file forwarded as `--config <path>`.
    pub config_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary_path: PathBuf::from("nsjail"),
            config_path: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DependenciesConfig {
    /// Binary invoked as `<binary> prepare-deps` before launching literal code.
    pub prepare_binary: Option<PathBuf>,
    pub timeout_ms: u64,
}

impl Default for DependenciesConfig {
    fn default() -> Self {
        Self {
            prepare_binary: None,
            timeout_ms: 120_000,
        }
    }
}

impl DependenciesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Backend that signs debug tokens; its key set lives at `/api/debug/jwks`.
    pub base_url: Option<Url>,
    pub require_signed_requests: bool,
    /// Exported to launched scripts as `WM_BASE_URL`, overriding the client's value.
    pub base_internal_url: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            require_signed_requests: true,
            base_internal_url: None,
        }
    }
}

impl AuthConfig {
    /// Location of the JSON Web Key Set, if a signing backend is configured.
    pub fn jwks_url(&self) -> Option<Url> {
        let base = self.effective_base_url()?;
        let trimmed = base.as_str().trim_end_matches('/');
        Url::parse(&format!("{trimmed}/api/debug/jwks")).ok()
    }

    /// The backend URL used when a literal `base_url` is absent: the internal
    /// URL doubles as the signing backend, matching single-host deployments.
    pub fn effective_base_url(&self) -> Option<Url> {
        self.base_url.clone().or_else(|| {
            self.base_internal_url
                .as_deref()
                .and_then(|raw| Url::parse(raw).ok())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    pub level: String,
    pub json: bool,
    /// Append logs to this file in addition to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            file: None,
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Effective filter; `RUST_LOG` directives are appended when present.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FerryConfig {
    pub listen: ListenConfig,
    pub runtime: RuntimeConfig,
    pub sandbox: SandboxConfig,
    pub dependencies: DependenciesConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

impl FerryConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// The file named by `cli_path`, else by `FERRY_CONFIG` in `lookup`, else
    /// the defaults. A named file that cannot be read or parsed is an error.
    pub fn load_layered_file(
        cli_path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = cli_path
            .map(Path::to_path_buf)
            .or_else(|| lookup(CONFIG_PATH_ENV).filter(|v| !v.is_empty()).map(PathBuf::from));
        match path {
            Some(path) => Self::load_from_path(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply `DAP_*` overrides from the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `DAP_*` overrides using `lookup` as the environment.
    ///
    /// Empty values are treated as unset.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(host) = get("DAP_HOST") {
            self.listen.host = host;
        }
        if let Some(port) = get("DAP_PORT") {
            self.listen.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "DAP_PORT",
                message: format!("expected a port number, got {port:?}"),
            })?;
        }
        if let Some(path) = get("DAP_RUNTIME_PATH") {
            self.runtime.path = PathBuf::from(path);
        }
        if let Some(enabled) = get("DAP_SANDBOX_ENABLED") {
            self.sandbox.enabled = parse_bool("DAP_SANDBOX_ENABLED", &enabled)?;
        }
        if let Some(path) = get("DAP_SANDBOX_CONFIG") {
            self.sandbox.config_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get("DAP_SANDBOX_PATH") {
            self.sandbox.binary_path = PathBuf::from(path);
        }
        if let Some(path) = get("DAP_PREPARE_DEPS_PATH") {
            self.dependencies.prepare_binary = Some(PathBuf::from(path));
        }
        if let Some(debug) = get("DAP_DEBUG") {
            if parse_bool("DAP_DEBUG", &debug)? {
                self.logging.level = "debug".to_owned();
            }
        }
        if let Some(raw) = get("DAP_AUTH_BASE_URL") {
            let url = Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidEnv {
                name: "DAP_AUTH_BASE_URL",
                message: err.to_string(),
            })?;
            self.auth.base_url = Some(url);
        }
        if let Some(raw) = get("DAP_BASE_INTERNAL_URL") {
            self.auth.base_internal_url = Some(raw.trim().to_owned());
        }
        if let Some(required) = get("DAP_REQUIRE_SIGNED_REQUESTS") {
            // Anything other than an explicit `false` keeps verification on.
            self.auth.require_signed_requests = !required.trim().eq_ignore_ascii_case("false");
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.host.trim().is_empty() {
            return Err(ConfigError::Invalid("listen host must not be empty".to_owned()));
        }
        if let Some(binary) = &self.dependencies.prepare_binary {
            if !binary.exists() {
                return Err(ConfigError::Invalid(format!(
                    "dependency preparation binary not found at {}",
                    binary.display()
                )));
            }
        }
        if self.runtime.discovery_timeout_ms == 0 || self.runtime.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "runtime timeouts must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidEnv {
            name,
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber.
///
/// Safe to call multiple times; only the first call has an effect.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

        let writer = match file {
            Some(file) => BoxMakeWriter::new(std::io::stderr.and(Mutex::new(file))),
            None => BoxMakeWriter::new(std::io::stderr),
        };

        let registry = tracing_subscriber::registry().with(filter);
        let _ = if config.json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .try_init()
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_target(true),
                )
                .try_init()
        };
    });
}
