#![cfg(unix)]
//! Terminal manager integration tests with real shell children.

use std::time::Duration;

use acp_conduit::config::TerminalConfig;
use acp_conduit::terminal::{CreateTerminal, TerminalManager};
use acp_conduit::PeerError;

fn manager() -> std::sync::Arc<TerminalManager> {
    TerminalManager::new(&TerminalConfig::default())
}

fn small_cache_manager() -> std::sync::Arc<TerminalManager> {
    TerminalManager::new(&TerminalConfig {
        default_byte_limit: 1_000_000,
        released_capacity: 2,
    })
}

// ── S6: byte cap ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn output_is_capped_to_the_byte_limit_with_truncation_latched() {
    let manager = manager();
    let id = manager
        .create(CreateTerminal {
            command: "printf".into(),
            args: Some(vec!["A".repeat(4096)]),
            byte_limit: Some(1024),
            ..CreateTerminal::default()
        })
        .await
        .expect("terminal must spawn");

    let exit = manager.wait_for_exit(&id).await.expect("child must exit");
    assert_eq!(exit.exit_code, Some(0));

    let snapshot = manager.output(&id).await.expect("output must be readable");
    assert_eq!(snapshot.output.len(), 1024, "window must hold exactly the cap");
    assert!(snapshot.output.bytes().all(|b| b == b'A'));
    assert!(snapshot.truncated, "dropping bytes must latch truncation");
    assert_eq!(
        snapshot.exit_status.expect("exit must be reported").exit_code,
        Some(0)
    );
}

#[tokio::test]
async fn short_output_is_complete_and_untruncated() {
    let manager = manager();
    let id = manager
        .create(CreateTerminal {
            command: "echo".into(),
            args: Some(vec!["hello".into()]),
            ..CreateTerminal::default()
        })
        .await
        .expect("terminal must spawn");

    manager.wait_for_exit(&id).await.expect("child must exit");
    let snapshot = manager.output(&id).await.expect("output must be readable");
    assert_eq!(snapshot.output, "hello\n");
    assert!(!snapshot.truncated);
}

// ── Shell commands ───────────────────────────────────────────────────────────

#[tokio::test]
async fn metacharacter_commands_run_under_a_shell() {
    let manager = manager();
    let id = manager
        .create(CreateTerminal {
            command: "echo one; echo two".into(),
            ..CreateTerminal::default()
        })
        .await
        .expect("shell command must spawn");

    manager.wait_for_exit(&id).await.expect("child must exit");
    let snapshot = manager.output(&id).await.expect("output must be readable");
    assert_eq!(snapshot.output, "one\ntwo\n");
}

#[tokio::test]
async fn stderr_is_merged_into_the_output_buffer() {
    let manager = manager();
    let id = manager
        .create(CreateTerminal {
            command: "echo err >&2".into(),
            ..CreateTerminal::default()
        })
        .await
        .expect("shell command must spawn");

    manager.wait_for_exit(&id).await.expect("child must exit");
    let snapshot = manager.output(&id).await.expect("output must be readable");
    assert_eq!(snapshot.output, "err\n");
}

// ── Wait / kill ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn kill_resolves_pending_waiters() {
    let manager = manager();
    let id = manager
        .create(CreateTerminal {
            command: "sleep".into(),
            args: Some(vec!["30".into()]),
            ..CreateTerminal::default()
        })
        .await
        .expect("terminal must spawn");

    let waiter = {
        let manager = std::sync::Arc::clone(&manager);
        let id = id.clone();
        tokio::spawn(async move { manager.wait_for_exit(&id).await })
    };
    // Give the waiter time to register.
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.kill(&id).await.expect("kill must succeed");

    let exit = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter must resolve after kill")
        .expect("task")
        .expect("wait must succeed");
    assert!(exit.exit_code.is_none(), "killed child has no exit code");
    assert!(exit.signal.is_some(), "killed child must report its signal");
}

#[tokio::test]
async fn wait_after_exit_returns_immediately() {
    let manager = manager();
    let id = manager
        .create(CreateTerminal {
            command: "true".into(),
            ..CreateTerminal::default()
        })
        .await
        .expect("terminal must spawn");

    let first = manager.wait_for_exit(&id).await.expect("first wait");
    let second = manager.wait_for_exit(&id).await.expect("second wait");
    assert_eq!(first, second);
}

// ── Release semantics ────────────────────────────────────────────────────────

#[tokio::test]
async fn released_terminal_stays_readable_until_evicted() {
    let manager = small_cache_manager();
    let id = manager
        .create(CreateTerminal {
            command: "echo".into(),
            args: Some(vec!["kept".into()]),
            ..CreateTerminal::default()
        })
        .await
        .expect("terminal must spawn");

    manager.wait_for_exit(&id).await.expect("child must exit");
    manager.release(&id).await.expect("release must succeed");

    // Output still works on the released handle.
    let snapshot = manager.output(&id).await.expect("released output must read");
    assert_eq!(snapshot.output, "kept\n");
    assert_eq!(
        snapshot.exit_status.expect("exit must be cached").exit_code,
        Some(0)
    );

    // Every other operation reports the released state.
    assert!(matches!(
        manager.wait_for_exit(&id).await,
        Err(PeerError::TerminalReleased(_))
    ));
    assert!(matches!(
        manager.kill(&id).await,
        Err(PeerError::TerminalReleased(_))
    ));
    assert!(matches!(
        manager.release(&id).await,
        Err(PeerError::TerminalReleased(_))
    ));

    // Two more releases evict the oldest cache entry (capacity 2).
    for _ in 0..2 {
        let next = manager
            .create(CreateTerminal {
                command: "true".into(),
                ..CreateTerminal::default()
            })
            .await
            .expect("terminal must spawn");
        manager.wait_for_exit(&next).await.expect("child must exit");
        manager.release(&next).await.expect("release must succeed");
    }

    assert!(matches!(
        manager.output(&id).await,
        Err(PeerError::TerminalNotFound(_))
    ));
}

#[tokio::test]
async fn release_kills_a_still_running_child() {
    let manager = manager();
    let id = manager
        .create(CreateTerminal {
            command: "sleep".into(),
            args: Some(vec!["30".into()]),
            ..CreateTerminal::default()
        })
        .await
        .expect("terminal must spawn");

    manager.release(&id).await.expect("release must succeed");

    let snapshot = manager.output(&id).await.expect("released output must read");
    let exit = snapshot.exit_status.expect("exit must be recorded");
    assert!(exit.signal.is_some(), "release must have signalled the child");
}

// ── Failure modes ────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_id_is_not_found() {
    let manager = manager();
    assert!(matches!(
        manager.output("no-such-terminal").await,
        Err(PeerError::TerminalNotFound(_))
    ));
}

#[tokio::test]
async fn unknown_program_is_executable_not_found() {
    let manager = manager();
    let result = manager
        .create(CreateTerminal {
            command: "definitely-not-a-real-binary-qqq".into(),
            ..CreateTerminal::default()
        })
        .await;
    assert!(matches!(result, Err(PeerError::ExecutableNotFound(_))));
}

#[tokio::test]
async fn unterminated_quote_is_a_parse_error() {
    let manager = manager();
    let result = manager
        .create(CreateTerminal {
            command: "echo \"broken".into(),
            ..CreateTerminal::default()
        })
        .await;
    assert!(matches!(result, Err(PeerError::CommandParse(_))));
}
