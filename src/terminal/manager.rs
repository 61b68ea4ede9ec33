//! Terminal session manager.
//!
//! Tracks shell commands spawned on behalf of the agent. Each live entry
//! owns its child process, a byte-capped rolling output buffer fed by pump
//! tasks, and a list of exit waiters. One manager-wide poll task reaps
//! exits at a 100 ms cadence. Released terminals move into a bounded FIFO
//! cache that stays readable through `output` until evicted.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TerminalConfig;
use crate::shell_env;
use crate::terminal::command::{plan_invocation, Invocation};
use crate::terminal::session::{
    ExitInfo, LiveTerminal, OutputSnapshot, ReleasedTerminal, RollingBuffer,
};
use crate::{PeerError, Result};

/// Cadence of the exit-reaping poll task.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period between SIGTERM and the forced kill during `kill`/`release`.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Parameters for creating a terminal session.
#[derive(Debug, Clone, Default)]
pub struct CreateTerminal {
    /// Command string; shell metacharacters route it through `sh -c`.
    pub command: String,
    /// Explicit argument vector. When absent, the command string may be
    /// tokenized.
    pub args: Option<Vec<String>>,
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// Environment overrides layered on the shell snapshot.
    pub env: Vec<(String, String)>,
    /// Output byte cap; the manager default applies when absent.
    pub byte_limit: Option<usize>,
}

/// Terminal session manager for the client role.
pub struct TerminalManager {
    live: Mutex<HashMap<String, LiveTerminal>>,
    released: Mutex<VecDeque<(String, ReleasedTerminal)>>,
    default_byte_limit: usize,
    released_capacity: usize,
}

impl TerminalManager {
    /// Create a manager and start its exit-poll task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: &TerminalConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            live: Mutex::new(HashMap::new()),
            released: Mutex::new(VecDeque::new()),
            default_byte_limit: config.default_byte_limit,
            released_capacity: config.released_capacity,
        });
        tokio::spawn(poll_exits(Arc::downgrade(&manager)));
        manager
    }

    /// Spawn a terminal command and return its opaque id.
    ///
    /// # Errors
    ///
    /// - `PeerError::CommandParse` / `PeerError::ExecutableNotFound` — the
    ///   command could not be planned.
    /// - `PeerError::Spawn` — the OS refused to start the child.
    pub async fn create(&self, spec: CreateTerminal) -> Result<String> {
        let invocation = plan_invocation(&spec.command, spec.args)?;
        let snapshot = shell_env::snapshot().await;

        let mut command = match &invocation {
            Invocation::Shell(line) => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(line);
                command
            }
            Invocation::Direct { program, args } => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
        };

        command.env_clear().envs(snapshot).envs(spec.env.clone());
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        command
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                PeerError::ExecutableNotFound(spec.command.clone())
            } else {
                PeerError::Spawn(format!("failed to spawn terminal command: {err}"))
            }
        })?;

        let limit = spec.byte_limit.unwrap_or(self.default_byte_limit);
        let buffer = Arc::new(std::sync::Mutex::new(RollingBuffer::new(limit)));

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_output(stdout, Arc::clone(&buffer))));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_output(stderr, Arc::clone(&buffer))));
        }

        let id = Uuid::new_v4().to_string();
        debug!(terminal_id = %id, command = %spec.command, "terminal created");

        self.live.lock().await.insert(
            id.clone(),
            LiveTerminal {
                child: Some(child),
                buffer,
                exit: None,
                waiters: Vec::new(),
                pumps,
            },
        );

        Ok(id)
    }

    /// Current output window, truncation latch, and exit status if any.
    ///
    /// Works for live and released terminals alike.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::TerminalNotFound` for unknown ids.
    pub async fn output(&self, id: &str) -> Result<OutputSnapshot> {
        if let Some(entry) = self.live.lock().await.get(id) {
            return Ok(entry.snapshot());
        }
        let released = self.released.lock().await;
        released
            .iter()
            .find(|(cached_id, _)| cached_id == id)
            .map(|(_, cached)| OutputSnapshot {
                output: cached.output.clone(),
                truncated: cached.truncated,
                exit_status: cached.exit_status.clone(),
            })
            .ok_or_else(|| PeerError::TerminalNotFound(id.to_owned()))
    }

    /// Await the child's exit.
    ///
    /// Returns immediately when the exit was already observed; otherwise a
    /// one-shot waiter is resolved by the poll task.
    ///
    /// # Errors
    ///
    /// `PeerError::TerminalNotFound` / `PeerError::TerminalReleased`.
    pub async fn wait_for_exit(&self, id: &str) -> Result<ExitInfo> {
        let rx = {
            let mut live = self.live.lock().await;
            match live.get_mut(id) {
                Some(entry) => {
                    if let Some(exit) = &entry.exit {
                        return Ok(exit.clone());
                    }
                    let (tx, rx) = oneshot::channel();
                    entry.waiters.push(tx);
                    rx
                }
                None => return Err(self.missing(id).await),
            }
        };

        rx.await
            .map_err(|_| PeerError::TerminalReleased(id.to_owned()))
    }

    /// Terminate the child and resolve every pending waiter.
    ///
    /// # Errors
    ///
    /// `PeerError::TerminalNotFound` / `PeerError::TerminalReleased`.
    pub async fn kill(&self, id: &str) -> Result<()> {
        let child = {
            let mut live = self.live.lock().await;
            match live.get_mut(id) {
                Some(entry) => {
                    if entry.exit.is_some() {
                        // Already exited; waiters were resolved by the poll.
                        return Ok(());
                    }
                    entry.child.take()
                }
                None => return Err(self.missing(id).await),
            }
        };

        let Some(child) = child else {
            // Another kill/release is mid-flight; nothing to do.
            return Ok(());
        };

        let exit = terminate_child(child).await;

        let mut live = self.live.lock().await;
        if let Some(entry) = live.get_mut(id) {
            entry.record_exit(exit);
        }
        Ok(())
    }

    /// Release the terminal: kill if running, cache the final output, and
    /// drop the live entry.
    ///
    /// # Errors
    ///
    /// `PeerError::TerminalNotFound` / `PeerError::TerminalReleased`.
    pub async fn release(&self, id: &str) -> Result<()> {
        let mut entry = {
            let mut live = self.live.lock().await;
            match live.remove(id) {
                Some(entry) => entry,
                None => return Err(self.missing(id).await),
            }
        };

        let exit = match (&entry.exit, entry.child.take()) {
            (Some(exit), _) => exit.clone(),
            (None, Some(child)) => terminate_child(child).await,
            (None, None) => ExitInfo {
                exit_code: None,
                signal: None,
            },
        };

        // Let the pumps drain the final pipe contents before snapshotting.
        for pump in entry.pumps.drain(..) {
            let _ = pump.await;
        }

        entry.record_exit(exit.clone());
        let snapshot = entry.snapshot();

        let mut released = self.released.lock().await;
        released.push_back((
            id.to_owned(),
            ReleasedTerminal {
                output: snapshot.output,
                truncated: snapshot.truncated,
                exit_status: Some(exit),
            },
        ));
        while released.len() > self.released_capacity {
            if let Some((evicted, _)) = released.pop_front() {
                debug!(terminal_id = %evicted, "released terminal evicted from cache");
            }
        }
        debug!(terminal_id = %id, "terminal released");
        Ok(())
    }

    /// Error for an id absent from the live table.
    async fn missing(&self, id: &str) -> PeerError {
        let released = self.released.lock().await;
        if released.iter().any(|(cached_id, _)| cached_id == id) {
            PeerError::TerminalReleased(id.to_owned())
        } else {
            PeerError::TerminalNotFound(id.to_owned())
        }
    }
}

// ── Child termination ─────────────────────────────────────────────────────────

/// Signal-terminate a child, escalating to a forced kill after the grace
/// period, and return the observed exit.
async fn terminate_child(mut child: Child) -> ExitInfo {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, %err, "SIGTERM failed, falling back to kill");
        }
    }

    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(status)) => ExitInfo::from_status(status),
        Ok(Err(err)) => {
            warn!(%err, "failed to reap terminal child");
            ExitInfo {
                exit_code: None,
                signal: None,
            }
        }
        Err(_elapsed) => {
            if let Err(err) = child.kill().await {
                warn!(%err, "forced kill of terminal child failed");
            }
            match child.try_wait() {
                Ok(Some(status)) => ExitInfo::from_status(status),
                _ => ExitInfo {
                    exit_code: None,
                    signal: Some("SIGKILL".to_owned()),
                },
            }
        }
    }
}

// ── Background tasks ──────────────────────────────────────────────────────────

/// Copy child output into the rolling buffer until EOF.
async fn pump_output<R>(mut reader: R, buffer: Arc<std::sync::Mutex<RollingBuffer>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buffer
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push(&chunk[..n]);
            }
        }
    }
}

/// Single poll loop resolving exit waiters across every live terminal.
///
/// An exit is recorded only once the output pumps have finished, so a
/// waiter that immediately calls `output` sees the complete tail.
async fn poll_exits(manager: Weak<TerminalManager>) {
    loop {
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        let Some(manager) = manager.upgrade() else {
            break;
        };

        let mut live = manager.live.lock().await;
        for (id, entry) in live.iter_mut() {
            if entry.exit.is_some() {
                continue;
            }
            let Some(child) = entry.child.as_mut() else {
                continue;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    if entry.pumps_finished() {
                        entry.record_exit(ExitInfo::from_status(status));
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(terminal_id = %id, %err, "failed to poll terminal child");
                    entry.record_exit(ExitInfo {
                        exit_code: None,
                        signal: None,
                    });
                }
            }
        }
    }
}
