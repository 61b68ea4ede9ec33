//! Unit tests for the persistent orphan registry.

use acp_conduit::supervisor::{ProcessRecord, ProcessRegistry};
use chrono::Utc;
use std::path::PathBuf;

fn scratch_registry() -> (tempfile::TempDir, ProcessRegistry) {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = ProcessRegistry::at_path(dir.path().join("acp-processes.json"));
    (dir, registry)
}

#[test]
fn missing_file_loads_as_empty() {
    let (_dir, registry) = scratch_registry();
    assert!(registry.load().is_empty());
}

#[test]
fn record_and_remove_roundtrip() {
    let (_dir, registry) = scratch_registry();
    registry
        .record(ProcessRecord::now(101, Some(101), PathBuf::from("/bin/agent")))
        .expect("record must write");
    registry
        .record(ProcessRecord::now(202, None, PathBuf::from("/bin/other")))
        .expect("record must write");

    let records = registry.load();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r.pid == 101 && r.pgid == Some(101)));

    registry.remove(101).expect("remove must write");
    let records = registry.load();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pid, 202);
}

#[test]
fn re_recording_a_pid_replaces_the_old_entry() {
    let (_dir, registry) = scratch_registry();
    registry
        .record(ProcessRecord::now(7, None, PathBuf::from("/bin/a")))
        .expect("record");
    registry
        .record(ProcessRecord::now(7, Some(7), PathBuf::from("/bin/b")))
        .expect("record");

    let records = registry.load();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].agent_path, PathBuf::from("/bin/b"));
}

#[test]
fn unknown_shape_file_is_treated_as_empty() {
    let (_dir, registry) = scratch_registry();
    std::fs::create_dir_all(registry.path().parent().expect("parent")).expect("mkdir");
    std::fs::write(registry.path(), b"{\"version\": 99, \"entries\": {}}").expect("write");
    assert!(registry.load().is_empty());

    // The next write overwrites the unknown shape.
    registry
        .record(ProcessRecord::now(1, None, PathBuf::from("/bin/x")))
        .expect("record over unknown shape");
    assert_eq!(registry.load().len(), 1);
}

#[test]
fn records_older_than_seven_days_are_dropped_on_load() {
    let (_dir, registry) = scratch_registry();
    let fresh = ProcessRecord::now(1, None, PathBuf::from("/bin/fresh"));
    let stale = ProcessRecord {
        pid: 2,
        pgid: None,
        agent_path: PathBuf::from("/bin/stale"),
        started_at: Utc::now().timestamp() - 8 * 24 * 60 * 60,
    };
    registry.record(stale).expect("record stale");
    registry.record(fresh).expect("record fresh");

    let records = registry.load();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pid, 1);
}

#[test]
fn file_contents_use_the_wire_member_names() {
    let (_dir, registry) = scratch_registry();
    registry
        .record(ProcessRecord::now(9, Some(9), PathBuf::from("/bin/agent")))
        .expect("record");

    let raw = std::fs::read_to_string(registry.path()).expect("read file");
    assert!(raw.contains("\"agentPath\""), "expected camelCase agentPath in: {raw}");
    assert!(raw.contains("\"startedAt\""), "expected camelCase startedAt in: {raw}");
}
