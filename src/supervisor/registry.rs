//! Persistent orphan registry.
//!
//! Every spawned peer is recorded in a JSON file under the platform
//! app-support directory so that a host crash leaves a trail: the next
//! startup loads the file and reaps any peer that is still alive. The file
//! is written atomically (temp file + rename) on every mutation, and a
//! file whose shape is not understood is treated as empty and overwritten
//! on the next write.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::{PeerError, Result};

/// Records older than this are dropped on load.
const RECORD_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Grace period after the terminate signal during reaping.
const REAP_TERM_GRACE: Duration = Duration::from_secs(2);

/// Grace period after the kill signal during reaping.
const REAP_KILL_GRACE: Duration = Duration::from_secs(1);

/// One spawned-peer record, serialized camelCase on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    /// Child process id.
    pub pid: u32,
    /// Process group id, when the child was made a group leader.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pgid: Option<i32>,
    /// Executable the peer was launched from.
    pub agent_path: PathBuf,
    /// Spawn time, Unix epoch seconds.
    pub started_at: i64,
}

impl ProcessRecord {
    /// Build a record stamped with the current time.
    #[must_use]
    pub fn now(pid: u32, pgid: Option<i32>, agent_path: PathBuf) -> Self {
        Self {
            pid,
            pgid,
            agent_path,
            started_at: Utc::now().timestamp(),
        }
    }

    fn is_stale(&self) -> bool {
        let age = Utc::now().timestamp().saturating_sub(self.started_at);
        age > RECORD_MAX_AGE.as_secs() as i64
    }
}

/// Handle on the registry file.
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    path: PathBuf,
}

impl ProcessRegistry {
    /// Open the registry at its default app-support location
    /// (`<app-support>/ACP/acp-processes.json`).
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Config` when no app-support directory exists on
    /// this platform.
    pub fn open_default() -> Result<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| PeerError::Config("no app-support directory available".into()))?;
        Ok(Self::at_path(base.join("ACP").join("acp-processes.json")))
    }

    /// Open the registry at an explicit path.
    #[must_use]
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load records, silently dropping entries older than seven days.
    ///
    /// A missing or unreadable file yields an empty list.
    #[must_use]
    pub fn load(&self) -> Vec<ProcessRecord> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        let records: Vec<ProcessRecord> = match serde_json::from_slice(&raw) {
            Ok(records) => records,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "registry file has unknown shape, treating as empty");
                return Vec::new();
            }
        };
        records.into_iter().filter(|r| !r.is_stale()).collect()
    }

    /// Add (or replace) the record for a freshly spawned peer.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Io` when the file cannot be written.
    pub fn record(&self, record: ProcessRecord) -> Result<()> {
        let mut records = self.load();
        records.retain(|existing| existing.pid != record.pid);
        records.push(record);
        self.write_atomic(&records)
    }

    /// Remove the record for `pid`, if present.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Io` when the file cannot be written.
    pub fn remove(&self, pid: u32) -> Result<()> {
        let mut records = self.load();
        let before = records.len();
        records.retain(|existing| existing.pid != pid);
        if records.len() == before {
            return Ok(());
        }
        self.write_atomic(&records)
    }

    /// Replace the file contents with `records` via temp-file rename.
    fn write_atomic(&self, records: &[ProcessRecord]) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            PeerError::Io(format!("registry path has no parent: {}", self.path.display()))
        })?;
        std::fs::create_dir_all(parent)?;

        let mut file = tempfile::NamedTempFile::new_in(parent)?;
        let body = serde_json::to_vec_pretty(records)
            .map_err(|err| PeerError::Encode(err.to_string()))?;
        file.write_all(&body)?;
        file.persist(&self.path)
            .map_err(|err| PeerError::Io(format!("registry rename failed: {err}")))?;
        Ok(())
    }
}

// ── Orphan reaping ────────────────────────────────────────────────────────────

/// Reap peers left over from prior runs.
///
/// For each registry record: skip processes that are gone or whose command
/// line no longer mentions the recorded executable (pid reuse), terminate
/// the rest with the usual grace/kill escalation, and keep only the
/// records of processes that survive the kill. Errors are logged, never
/// fatal. Returns the number of processes signalled.
pub async fn reap_orphans(registry: &ProcessRegistry) -> usize {
    let records = registry.load();
    if records.is_empty() {
        // Still rewrite so stale entries pruned by load() leave the file.
        if let Err(err) = registry.write_atomic(&[]) {
            debug!(%err, "failed to rewrite empty registry");
        }
        return 0;
    }

    let mut system = System::new();
    refresh(&mut system, &records);

    let mut candidates = Vec::new();
    let mut survivors = Vec::new();

    for record in records {
        if live_process_matches(&system, &record) {
            candidates.push(record);
        } else {
            debug!(pid = record.pid, "orphan record no longer matches a live process");
        }
    }

    if candidates.is_empty() {
        if let Err(err) = registry.write_atomic(&[]) {
            debug!(%err, "failed to clear registry after reap");
        }
        return 0;
    }

    let signalled = candidates.len();
    info!(count = signalled, "reaping orphaned peer processes");

    for record in &candidates {
        signal_record(record, false);
    }
    tokio::time::sleep(REAP_TERM_GRACE).await;
    refresh(&mut system, &candidates);

    let resisting: Vec<_> = candidates
        .iter()
        .filter(|record| live_process_matches(&system, record))
        .cloned()
        .collect();

    if !resisting.is_empty() {
        for record in &resisting {
            signal_record(record, true);
        }
        tokio::time::sleep(REAP_KILL_GRACE).await;
        refresh(&mut system, &resisting);

        for record in resisting {
            if live_process_matches(&system, &record) {
                warn!(pid = record.pid, "orphan resisted kill, retaining record");
                survivors.push(record);
            }
        }
    }

    if let Err(err) = registry.write_atomic(&survivors) {
        warn!(%err, "failed to rewrite registry after reap");
    }
    signalled
}

fn refresh(system: &mut System, records: &[ProcessRecord]) {
    let pids: Vec<Pid> = records
        .iter()
        .map(|record| Pid::from_u32(record.pid))
        .collect();
    system.refresh_processes(ProcessesToUpdate::Some(&pids), true);
}

/// Whether the recorded pid is alive and still running the recorded
/// executable.
fn live_process_matches(system: &System, record: &ProcessRecord) -> bool {
    let Some(process) = system.process(Pid::from_u32(record.pid)) else {
        return false;
    };
    if process.status() == sysinfo::ProcessStatus::Zombie {
        return false;
    }
    let needle = record.agent_path.to_string_lossy();
    let cmd_matches = process
        .cmd()
        .iter()
        .any(|part| part.to_string_lossy().contains(needle.as_ref()));
    let exe_matches = process
        .exe()
        .is_some_and(|exe| exe.to_string_lossy().contains(needle.as_ref()));
    cmd_matches || exe_matches
}

/// Send the terminate (or kill) signal to the record's group or pid.
fn signal_record(record: &ProcessRecord, force: bool) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, killpg, Signal};
        use nix::unistd::Pid as NixPid;

        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        let outcome = match record.pgid {
            Some(pgid) => killpg(NixPid::from_raw(pgid), signal),
            None => kill(NixPid::from_raw(record.pid as i32), signal),
        };
        if let Err(err) = outcome {
            debug!(pid = record.pid, ?signal, %err, "orphan signal failed");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (record, force);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
