#![forbid(unsafe_code)]

//! `acp-conduit` — ACP agent driver binary.
//!
//! Reaps orphaned peers from prior runs, spawns the agent executable,
//! runs the initialize handshake, and prints inbound `session/update`
//! notifications as JSON lines. With `--prompt` it opens a session and
//! sends one prompt turn; with `--tap` every frame is mirrored to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use acp_conduit::client::ClientConnection;
use acp_conduit::endpoint::handler::{FsDelegate, HandlerResult, PermissionDelegate};
use acp_conduit::endpoint::{ClientRouter, EndpointOptions, PeerEndpoint};
use acp_conduit::framing::envelope::ErrorObject;
use acp_conduit::supervisor::{LaunchSpec, PeerSupervisor, ProcessRegistry, DEFAULT_KILL_GRACE};
use acp_conduit::tap::TapDirection;
use acp_conduit::terminal::TerminalManager;
use acp_conduit::{PeerError, Result, RuntimeConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "acp-conduit", about = "ACP agent driver", version, long_about = None)]
struct Cli {
    /// Path to the agent executable.
    #[arg(long)]
    agent: PathBuf,

    /// Working directory for the agent process.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Send one prompt turn after the handshake, then exit.
    #[arg(long)]
    prompt: Option<String>,

    /// Mirror every frame to stderr with direction and timestamp.
    #[arg(long)]
    tap: bool,

    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Arguments passed through to the agent executable.
    #[arg(trailing_var_arg = true)]
    agent_args: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| PeerError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => RuntimeConfig::load_from_path(path)?,
        None => RuntimeConfig::default(),
    };

    // ── Supervisor + orphan reaping ─────────────────────
    let registry = match &config.supervisor.registry_path {
        Some(path) => ProcessRegistry::at_path(path),
        None => ProcessRegistry::open_default()?,
    };
    let kill_grace = config
        .supervisor
        .kill_grace_ms
        .map_or(DEFAULT_KILL_GRACE, std::time::Duration::from_millis);
    let supervisor = PeerSupervisor::with_registry(registry, kill_grace);

    let reaped = supervisor.reap_orphans().await;
    if reaped > 0 {
        info!(reaped, "cleaned up orphaned peers from prior runs");
    }

    // ── Spawn the agent ─────────────────────────────────
    let spawned = supervisor
        .spawn(LaunchSpec {
            executable: args.agent.clone(),
            args: args.agent_args.clone(),
            cwd: args.cwd.clone(),
            env: Vec::new(),
        })
        .await?;

    let endpoint = Arc::new(PeerEndpoint::start(
        spawned.transport,
        EndpointOptions::client().with_config(&config),
    )?);
    let monitor = spawned.handle.monitor_exit(Arc::clone(&endpoint));

    let terminals = TerminalManager::new(&config.terminal);
    endpoint.set_handler(Arc::new(ClientRouter::new(
        Arc::new(LocalFs),
        Arc::new(DenyPermissions),
        terminals,
    )));

    if args.tap {
        let mut tap = endpoint.debug_tap();
        tokio::spawn(async move {
            while let Ok(record) = tap.recv().await {
                let direction = match record.direction {
                    TapDirection::Inbound => "<-",
                    TapDirection::Outbound => "->",
                };
                eprintln!(
                    "{} {} {}",
                    record.timestamp.to_rfc3339(),
                    direction,
                    String::from_utf8_lossy(&record.raw)
                );
            }
        });
    }

    let mut notifications = endpoint.notifications();
    tokio::spawn(async move {
        while let Ok(frame) = notifications.recv().await {
            let line = json!({ "method": frame.method, "params": frame.params });
            println!("{line}");
        }
    });

    // ── Handshake ───────────────────────────────────────
    let client = ClientConnection::new(Arc::clone(&endpoint));
    let init = client
        .initialize(
            json!({
                "protocolVersion": 1,
                "clientCapabilities": {
                    "fs": { "readTextFile": true, "writeTextFile": true },
                    "terminal": true,
                },
            }),
            Some(std::time::Duration::from_secs(30)),
        )
        .await?;
    info!(agent = %args.agent.display(), "agent initialized");
    println!("{init}");

    if let Some(prompt) = &args.prompt {
        run_prompt(&client, &args, prompt).await?;
    } else {
        shutdown_signal().await;
        info!("shutdown signal received");
    }

    // ── Teardown ────────────────────────────────────────
    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received — forcing exit");
        std::process::exit(1);
    });

    if let Err(err) = spawned.handle.terminate().await {
        warn!(%err, "peer termination reported an error");
    }
    endpoint.close();
    monitor.abort();
    info!("acp-conduit shut down");
    Ok(())
}

/// Open a session, send one prompt, and print the result.
async fn run_prompt(client: &ClientConnection, args: &Cli, prompt: &str) -> Result<()> {
    let cwd = args
        .cwd
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("/"));

    let session = client
        .new_session(json!({ "cwd": cwd, "mcpServers": [] }))
        .await?;
    let session_id = session
        .get("sessionId")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| PeerError::InvalidResponse("session/new returned no sessionId".into()))?
        .to_owned();
    info!(session_id, "session opened");

    let result = client
        .prompt(json!({
            "sessionId": session_id,
            "prompt": [{ "type": "text", "text": prompt }],
        }))
        .await?;
    println!("{result}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| PeerError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| PeerError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

// ── Inline delegates ──────────────────────────────────────────────────────────

/// File access for the agent, rooted at the host filesystem.
struct LocalFs;

#[async_trait::async_trait]
impl FsDelegate for LocalFs {
    async fn read_text_file(&self, params: serde_json::Value) -> HandlerResult {
        let path = params
            .get("path")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ErrorObject::invalid_params("fs/read_text_file: missing path"))?;
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| ErrorObject::internal(format!("read {path}: {err}")))?;
        Ok(json!({ "content": content }))
    }

    async fn write_text_file(&self, params: serde_json::Value) -> HandlerResult {
        let path = params
            .get("path")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ErrorObject::invalid_params("fs/write_text_file: missing path"))?;
        let content = params
            .get("content")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        tokio::fs::write(path, content)
            .await
            .map_err(|err| ErrorObject::internal(format!("write {path}: {err}")))?;
        Ok(json!({}))
    }
}

/// The driver has no operator to ask, so permission requests are refused.
struct DenyPermissions;

#[async_trait::async_trait]
impl PermissionDelegate for DenyPermissions {
    async fn request_permission(&self, _params: serde_json::Value) -> HandlerResult {
        Ok(json!({ "outcome": { "outcome": "cancelled" } }))
    }
}
