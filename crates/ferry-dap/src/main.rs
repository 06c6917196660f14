use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ferry_config::{FerryConfig, CONFIG_PATH_ENV};
use ferry_dap::{DebugServer, SessionConfig, TokenVerifier};

/// Debug Adapter Protocol bridge for Bun scripts.
///
/// Accepts DAP clients over WebSocket, launches each client's script with the
/// runtime's inspector enabled and relays between the two protocols.
#[derive(Debug, Parser)]
#[command(name = "ferry-dap", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `FERRY_CONFIG` is used as a fallback. Without either the
    /// built-in defaults apply. `DAP_*` environment variables override the
    /// file; flags override both.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Script runtime executable.
    #[arg(long)]
    runtime: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, config: &mut FerryConfig) {
        if let Some(host) = &self.host {
            config.listen.host = host.clone();
        }
        if let Some(port) = self.port {
            config.listen.port = port;
        }
        if let Some(runtime) = &self.runtime {
            config.runtime.path = runtime.clone();
        }
        if self.debug {
            config.logging.level = "debug".to_owned();
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    config
        .apply_process_env()
        .context("invalid DAP_* environment override")?;
    cli.apply(&mut config);
    ferry_config::init_tracing(&config.logging);
    config.validate().context("invalid configuration")?;

    let verifier = TokenVerifier::from_config(&config.auth).context("failed to build HTTP client")?;
    let session_config = Arc::new(SessionConfig::from_config(&config, Arc::new(verifier)));

    let server = DebugServer::bind(
        (config.listen.host.as_str(), config.listen.port),
        session_config,
    )
    .await
    .with_context(|| format!("failed to bind {}:{}", config.listen.host, config.listen.port))?;

    tracing::info!(
        target: "ferry.server",
        addr = %server.local_addr()?,
        runtime = %config.runtime.path.display(),
        sandbox = config.sandbox.enabled,
        signed_requests = config.auth.require_signed_requests,
        "ferry-dap listening"
    );

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!(target: "ferry.server", "shutdown signal received");
        shutdown.cancel();
    });

    server.run().await?;
    Ok(())
}

fn load_config(cli_path: Option<&Path>) -> anyhow::Result<FerryConfig> {
    FerryConfig::load_layered_file(cli_path, |name| std::env::var(name).ok()).with_context(|| {
        let source = cli_path
            .map(|path| path.display().to_string())
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_default();
        format!("failed to load config from {source}")
    })
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(target: "ferry.server", error = %err, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
