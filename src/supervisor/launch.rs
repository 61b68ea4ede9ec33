//! Peer process launching and termination.
//!
//! Spawning resolves the executable (one symlink level, `env node`
//! shebang detection), layers the login-shell snapshot under caller
//! overrides, places the child in its own process group, and records it
//! in the orphan registry before handing the stdio transport back.
//!
//! Termination signals the whole group, polls for exit at 50 ms, and
//! escalates to a forced kill after the grace period. Stdout is drained
//! by the transport pump until pipe EOF, so frames emitted during
//! shutdown still reach the endpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::endpoint::PeerEndpoint;
use crate::shell_env;
use crate::supervisor::registry::{ProcessRecord, ProcessRegistry};
use crate::terminal::ExitInfo;
use crate::transport::StdioTransport;
use crate::{PeerError, Result};

/// Default grace period between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Poll interval while waiting for the peer to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Well-known install prefixes scanned for a `node` interpreter.
const NODE_PREFIXES: &[&str] = &[
    "/usr/local/bin",
    "/usr/bin",
    "/opt/homebrew/bin",
    "/opt/local/bin",
];

/// Parameters for spawning a peer process.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    /// Path to the agent executable.
    pub executable: PathBuf,
    /// Arguments passed after any interpreter injection.
    pub args: Vec<String>,
    /// Working directory; also sets `PWD`/`OLDPWD` in the child env.
    pub cwd: Option<PathBuf>,
    /// Environment overrides layered on the shell snapshot.
    pub env: Vec<(String, String)>,
}

/// A spawned peer: the byte transport plus its control handle.
pub struct SpawnedPeer {
    /// Stdio transport for the endpoint.
    pub transport: StdioTransport,
    /// Handle for termination and exit monitoring.
    pub handle: PeerHandle,
}

/// Control handle over a live peer process.
#[derive(Clone)]
pub struct PeerHandle {
    pid: u32,
    pgid: Option<i32>,
    executable: PathBuf,
    child: Arc<Mutex<Child>>,
    registry: ProcessRegistry,
    kill_grace: Duration,
}

impl PeerHandle {
    /// Child process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Process group id, when the child leads its own group.
    #[must_use]
    pub fn pgid(&self) -> Option<i32> {
        self.pgid
    }

    /// Whether the child has not been reaped yet.
    pub async fn is_running(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    /// Spawn the exit monitor: when the child exits, the endpoint's
    /// pending requests drain with *peer exited* and the registry record
    /// is removed.
    #[must_use]
    pub fn monitor_exit(&self, endpoint: Arc<PeerEndpoint>) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let status = loop {
                {
                    let mut child = handle.child.lock().await;
                    match child.try_wait() {
                        Ok(Some(status)) => break Some(status),
                        Ok(None) => {}
                        Err(err) => {
                            warn!(pid = handle.pid, %err, "failed to poll peer process");
                            break None;
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            };

            let code = status.map(ExitInfo::from_status).and_then(|info| info.exit_code);
            info!(pid = handle.pid, ?code, "peer process exited");
            endpoint.notify_peer_exit(code);
            if let Err(err) = handle.registry.remove(handle.pid) {
                warn!(pid = handle.pid, %err, "failed to deregister exited peer");
            }
        })
    }

    /// Terminate the peer's process group, escalating to a forced kill
    /// after the grace period, and remove its registry record.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Io` when the registry cannot be updated; signal
    /// failures are logged, not surfaced.
    pub async fn terminate(&self) -> Result<()> {
        debug!(pid = self.pid, executable = %self.executable.display(), "terminating peer");
        self.signal(false);

        let deadline = tokio::time::Instant::now() + self.kill_grace;
        let mut exited = false;
        while tokio::time::Instant::now() < deadline {
            if matches!(self.child.lock().await.try_wait(), Ok(Some(_))) {
                exited = true;
                break;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }

        if !exited {
            debug!(pid = self.pid, "peer ignored terminate signal, escalating");
            self.signal(true);
            if let Err(err) = self.child.lock().await.wait().await {
                warn!(pid = self.pid, %err, "failed to reap peer after kill");
            }
        }

        self.registry.remove(self.pid)
    }

    /// Signal the process group, or the single process when no group is
    /// known.
    fn signal(&self, force: bool) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, killpg, Signal};
            use nix::unistd::Pid;

            let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
            let outcome = match self.pgid {
                Some(pgid) => killpg(Pid::from_raw(pgid), signal),
                None => kill(Pid::from_raw(self.pid as i32), signal),
            };
            if let Err(err) = outcome {
                debug!(pid = self.pid, ?signal, %err, "peer signal failed");
            }
        }
        #[cfg(not(unix))]
        {
            if force {
                let child = Arc::clone(&self.child);
                tokio::spawn(async move {
                    let _ = child.lock().await.start_kill();
                });
            }
        }
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

/// Spawns and terminates peer processes and operates the orphan registry.
pub struct PeerSupervisor {
    registry: ProcessRegistry,
    kill_grace: Duration,
}

impl PeerSupervisor {
    /// Create a supervisor over the default registry location.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Config` when no app-support directory exists.
    pub fn new() -> Result<Self> {
        Ok(Self {
            registry: ProcessRegistry::open_default()?,
            kill_grace: DEFAULT_KILL_GRACE,
        })
    }

    /// Create a supervisor with an explicit registry and grace period.
    #[must_use]
    pub fn with_registry(registry: ProcessRegistry, kill_grace: Duration) -> Self {
        Self {
            registry,
            kill_grace,
        }
    }

    /// The orphan registry in use.
    #[must_use]
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Reap orphaned peers recorded by prior runs. Never fails; errors are
    /// logged.
    pub async fn reap_orphans(&self) -> usize {
        super::registry::reap_orphans(&self.registry).await
    }

    /// Spawn a peer process and return its transport and control handle.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Spawn` when the executable cannot be resolved or
    /// the OS refuses to start it.
    pub async fn spawn(&self, spec: LaunchSpec) -> Result<SpawnedPeer> {
        let resolved = resolve_launch(&spec.executable, &spec.args)?;
        let snapshot = shell_env::snapshot().await;

        let mut command = std::process::Command::new(&resolved.program);
        command.args(&resolved.args);
        command.env_clear();
        command.envs(snapshot.iter());

        // PATH gets the executable's directory prefixed so sibling helper
        // binaries resolve.
        if let Some(dir) = spec.executable.parent().filter(|d| !d.as_os_str().is_empty()) {
            let path = snapshot.get("PATH").cloned().unwrap_or_default();
            command.env("PATH", format!("{}:{path}", dir.display()));
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
            command.env("PWD", cwd.as_os_str());
            command.env("OLDPWD", cwd.as_os_str());
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut command = Command::from(command);
        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| {
            PeerError::Spawn(format!(
                "failed to spawn {}: {err}",
                spec.executable.display()
            ))
        })?;

        let pid = child.id().ok_or_else(|| {
            PeerError::Spawn("peer exited before its pid could be read".into())
        })?;
        let pgid = cfg!(unix).then_some(pid as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PeerError::Spawn("failed to capture peer stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PeerError::Spawn("failed to capture peer stdout".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(pid, stderr));
        }

        self.registry
            .record(ProcessRecord::now(pid, pgid, spec.executable.clone()))?;
        info!(pid, executable = %spec.executable.display(), "peer process spawned");

        Ok(SpawnedPeer {
            transport: StdioTransport::new(stdin, stdout),
            handle: PeerHandle {
                pid,
                pgid,
                executable: spec.executable,
                child: Arc::new(Mutex::new(child)),
                registry: self.registry.clone(),
                kill_grace: self.kill_grace,
            },
        })
    }
}

/// Forward peer stderr to the debug log, line by line.
async fn log_stderr(pid: u32, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "peer_stderr", pid, line = %line);
    }
}

// ── Executable resolution ─────────────────────────────────────────────────────

struct ResolvedLaunch {
    program: PathBuf,
    args: Vec<String>,
}

/// Resolve the program to invoke: follow one symlink level, and reroute
/// `#!/usr/bin/env node` scripts through a located `node` interpreter.
fn resolve_launch(executable: &Path, args: &[String]) -> Result<ResolvedLaunch> {
    let resolved = match std::fs::read_link(executable) {
        Ok(target) if target.is_absolute() => target,
        Ok(target) => executable
            .parent()
            .map_or(target.clone(), |parent| parent.join(target)),
        Err(_) => executable.to_path_buf(),
    };

    if is_env_node_script(&resolved) {
        if let Some(node) = find_node(executable, &resolved) {
            debug!(node = %node.display(), script = %executable.display(), "invoking script via node");
            let mut full_args = vec![executable.to_string_lossy().into_owned()];
            full_args.extend_from_slice(args);
            return Ok(ResolvedLaunch {
                program: node,
                args: full_args,
            });
        }
        warn!(script = %resolved.display(), "node interpreter not found, invoking script directly");
    }

    Ok(ResolvedLaunch {
        program: executable.to_path_buf(),
        args: args.to_vec(),
    })
}

/// Whether the file's first bytes are an `env node` shebang.
fn is_env_node_script(path: &Path) -> bool {
    let mut head = [0u8; 64];
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let n = std::io::Read::read(&mut file, &mut head).unwrap_or(0);
    head[..n].starts_with(b"#!/usr/bin/env node")
}

/// Locate a `node` interpreter near the script, then in well-known
/// prefixes, then on `PATH`.
fn find_node(executable: &Path, resolved: &Path) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = executable.parent() {
        candidates.push(dir.join("node"));
    }
    if let Some(dir) = resolved.parent() {
        candidates.push(dir.join("node"));
    }
    for prefix in NODE_PREFIXES {
        candidates.push(PathBuf::from(prefix).join("node"));
    }
    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .or_else(|| which::which("node").ok())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
