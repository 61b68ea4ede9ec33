//! Login-shell environment snapshot.
//!
//! Children launched by this runtime (the agent peer and terminal
//! commands) should see the `PATH`, locale, and tool configuration the
//! user's interactive shell would provide, not the minimal environment of
//! the host process. The snapshot is computed once per process by running
//! the login shell and harvesting its `env` output; concurrent first
//! callers block on a condition variable until the single loader finishes.
//!
//! If the shell cannot be launched the current process environment is the
//! fallback, so the snapshot is always available.

use std::collections::HashMap;
use std::process::Command;
use std::sync::{Condvar, Mutex};

use tracing::{debug, warn};

static STATE: Mutex<CacheState> = Mutex::new(CacheState::Empty);
static LOADED: Condvar = Condvar::new();

enum CacheState {
    Empty,
    Loading,
    Ready(HashMap<String, String>),
}

/// Snapshot of the login-shell environment, by value.
///
/// Never blocks the event loop: the initial load runs on the blocking
/// thread pool.
pub async fn snapshot() -> HashMap<String, String> {
    match tokio::task::spawn_blocking(blocking_snapshot).await {
        Ok(map) => map,
        Err(err) => {
            warn!(%err, "shell environment loader task failed, using process env");
            std::env::vars().collect()
        }
    }
}

/// Blocking form of [`snapshot`] for non-async callers.
///
/// Must not be called from an event-loop thread; use [`snapshot`] there.
pub fn blocking_snapshot() -> HashMap<String, String> {
    {
        let mut state = STATE
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            match &*state {
                CacheState::Ready(map) => return map.clone(),
                CacheState::Loading => {
                    state = LOADED
                        .wait(state)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                CacheState::Empty => {
                    *state = CacheState::Loading;
                    break;
                }
            }
        }
    }

    let map = load_login_environment();

    let mut state = STATE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    *state = CacheState::Ready(map.clone());
    LOADED.notify_all();
    map
}

/// Clear the cache and re-trigger loading in the background.
pub fn reload() {
    {
        let mut state = STATE
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if matches!(*state, CacheState::Loading) {
            // A loader is already running; its result will replace the cache.
            return;
        }
        *state = CacheState::Empty;
    }
    if tokio::runtime::Handle::try_current().is_ok() {
        let _ = tokio::task::spawn_blocking(blocking_snapshot);
    }
}

/// Run the user's login shell and parse its environment.
fn load_login_environment() -> HashMap<String, String> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/zsh".to_owned());

    // Interactive + login gives the fullest rc-file coverage; some shells
    // reject `-i` with `-c`, so retry login-only before giving up.
    for flags in ["-ilc", "-lc"] {
        match Command::new(&shell).arg(flags).arg("env").output() {
            Ok(output) if output.status.success() => {
                let map = parse_env_lines(&output.stdout);
                if !map.is_empty() {
                    debug!(shell = %shell, flags, vars = map.len(), "shell environment captured");
                    return map;
                }
            }
            Ok(output) => {
                debug!(shell = %shell, flags, status = ?output.status.code(), "shell env probe failed");
            }
            Err(err) => {
                debug!(shell = %shell, flags, %err, "failed to launch login shell");
            }
        }
    }

    warn!(shell = %shell, "falling back to current process environment");
    std::env::vars().collect()
}

/// Parse `KEY=VALUE` lines; lines without `=` (continuations of multiline
/// values) are skipped.
fn parse_env_lines(stdout: &[u8]) -> HashMap<String, String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter_map(|line| {
            line.split_once('=')
                .filter(|(key, _)| !key.is_empty() && !key.contains(char::is_whitespace))
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
