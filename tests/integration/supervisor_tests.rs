#![cfg(unix)]
//! Supervisor integration tests: spawn, terminate, exit monitoring, and
//! orphan reaping with real processes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use acp_conduit::endpoint::{EndpointOptions, PeerEndpoint};
use acp_conduit::supervisor::{
    reap_orphans, LaunchSpec, PeerSupervisor, ProcessRecord, ProcessRegistry, DEFAULT_KILL_GRACE,
};
use acp_conduit::PeerError;

fn scratch_supervisor() -> (tempfile::TempDir, PeerSupervisor) {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = ProcessRegistry::at_path(dir.path().join("acp-processes.json"));
    (dir, PeerSupervisor::with_registry(registry, DEFAULT_KILL_GRACE))
}

/// Whether a pid refers to a live (non-zombie, reapable) process.
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

// ── Spawn + terminate ────────────────────────────────────────────────────────

#[tokio::test]
async fn spawn_records_the_peer_and_terminate_cleans_up() {
    let (_dir, supervisor) = scratch_supervisor();

    let spawned = supervisor
        .spawn(LaunchSpec {
            executable: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "sleep 30".into()],
            ..LaunchSpec::default()
        })
        .await
        .expect("peer must spawn");

    let pid = spawned.handle.pid();
    assert!(spawned.handle.is_running().await);
    assert_eq!(spawned.handle.pgid(), Some(pid as i32));

    let records = supervisor.registry().load();
    assert_eq!(records.len(), 1, "spawn must write a registry record");
    assert_eq!(records[0].pid, pid);
    assert_eq!(records[0].agent_path, PathBuf::from("/bin/sh"));

    spawned.handle.terminate().await.expect("terminate must succeed");

    assert!(!spawned.handle.is_running().await);
    assert!(
        supervisor.registry().load().is_empty(),
        "terminate must remove the registry record"
    );
}

#[tokio::test]
async fn terminate_escalates_when_sigterm_is_ignored() {
    let (_dir, supervisor) = scratch_supervisor();

    // A shell that traps SIGTERM keeps running until the forced kill.
    let spawned = supervisor
        .spawn(LaunchSpec {
            executable: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "trap '' TERM; while true; do sleep 1; done".into()],
            ..LaunchSpec::default()
        })
        .await
        .expect("peer must spawn");

    let pid = spawned.handle.pid();
    spawned.handle.terminate().await.expect("terminate must succeed");
    assert!(!process_alive(pid), "forced kill must end the peer");
}

// ── Exit monitoring ──────────────────────────────────────────────────────────

#[tokio::test]
async fn peer_exit_is_observed_and_registry_is_cleared() {
    let (_dir, supervisor) = scratch_supervisor();

    let spawned = supervisor
        .spawn(LaunchSpec {
            executable: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "exit 7".into()],
            ..LaunchSpec::default()
        })
        .await
        .expect("peer must spawn");

    let endpoint = Arc::new(
        PeerEndpoint::start(spawned.transport, EndpointOptions::client())
            .expect("endpoint must start"),
    );
    let _monitor = spawned.handle.monitor_exit(Arc::clone(&endpoint));

    // The monitor polls at 100 ms; once it fires, calls report
    // peer-not-running and the registry record is gone.
    let mut observed = None;
    for _ in 0..50 {
        match endpoint.send_request("initialize", None, Some(Duration::from_millis(100))).await {
            Err(PeerError::NotRunning) => {
                observed = Some(());
                break;
            }
            _ => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    assert!(observed.is_some(), "peer exit must surface as peer-not-running");
    assert!(
        supervisor.registry().load().is_empty(),
        "exit monitor must deregister the peer"
    );
}

// ── Orphan reaping ───────────────────────────────────────────────────────────

#[tokio::test]
async fn reaping_kills_matching_processes_and_clears_the_registry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = ProcessRegistry::at_path(dir.path().join("acp-processes.json"));

    let mut orphan = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("orphan must spawn");
    let pid = orphan.id();

    registry
        .record(ProcessRecord::now(pid, None, PathBuf::from("sleep")))
        .expect("record must write");

    let signalled = reap_orphans(&registry).await;
    assert_eq!(signalled, 1, "the live orphan must be signalled");
    assert!(registry.load().is_empty(), "reaped orphan must leave the registry");

    let status = orphan.wait().expect("orphan must be reapable");
    assert!(!status.success(), "orphan must have died to a signal");
}

#[tokio::test]
async fn reaping_skips_records_whose_command_no_longer_matches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = ProcessRegistry::at_path(dir.path().join("acp-processes.json"));

    // Our own pid is alive, but its command line has nothing to do with
    // the recorded path: a reused pid must never be signalled.
    registry
        .record(ProcessRecord::now(
            std::process::id(),
            None,
            PathBuf::from("/no/such/agent-binary"),
        ))
        .expect("record must write");

    let signalled = reap_orphans(&registry).await;
    assert_eq!(signalled, 0, "a mismatched record must not be signalled");
    assert!(
        registry.load().is_empty(),
        "mismatched records are dropped as stale"
    );
}

#[tokio::test]
async fn reaping_drops_records_for_dead_pids() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = ProcessRegistry::at_path(dir.path().join("acp-processes.json"));

    let mut gone = std::process::Command::new("true")
        .spawn()
        .expect("child must spawn");
    let pid = gone.id();
    gone.wait().expect("child must exit");

    registry
        .record(ProcessRecord::now(pid, None, PathBuf::from("true")))
        .expect("record must write");

    let signalled = reap_orphans(&registry).await;
    assert_eq!(signalled, 0);
    assert!(registry.load().is_empty());
}
