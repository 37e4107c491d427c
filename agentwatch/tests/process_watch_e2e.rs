//! End-to-end checks against real child processes and files.

#![cfg(unix)]

use std::process::Stdio;
use std::time::Duration;

use agentwatch::{
    CancellationToken, KeySet, LogWatcher, Outcome, WatchError, eventually, eventually_async,
    eventually_ok, scan_file,
};
use tokio::process::Command;

#[ctor::ctor]
fn setup() {
    agentwatch::testing::init_test_logging();
}

const APM_READY: &str = "all precondition checks are now satisfied";
const APM_MISMATCH: &str = "The APM integration must be upgraded";
const POLL: Duration = Duration::from_millis(20);

fn shell(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

#[tokio::test]
async fn test_waits_for_ready_line_on_stderr() {
    let watcher = LogWatcher::new([APM_MISMATCH, APM_READY]).unwrap();
    let mut child = shell(&format!(
        "echo 'starting apm-server'; sleep 0.2; echo '{APM_READY}' 1>&2; echo 'serving'"
    ))
    .spawn()
    .unwrap();
    let handles = watcher.attach_child(&mut child);
    assert_eq!(handles.len(), 2);

    let cancel = CancellationToken::new();
    watcher
        .wait_for_keys(&[APM_READY], Duration::from_secs(10), POLL, &cancel)
        .await
        .unwrap();
    assert!(!watcher.key_occurred(APM_MISMATCH));

    assert!(child.wait().await.unwrap().success());
    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, 3);
    assert_eq!(watcher.records_seen(), 3);
}

#[tokio::test]
async fn test_state_survives_process_exit() {
    let watcher = LogWatcher::new(["stringValue\":\"syslog", "system.log"]).unwrap();
    let mut child = shell(r#"printf '%s\n' '{"stringValue":"syslog"}'"#)
        .spawn()
        .unwrap();
    let handles = watcher.attach_child(&mut child);
    child.wait().await.unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(watcher.key_occurred("stringValue\":\"syslog"));
    assert!(!watcher.key_occurred("system.log"));

    let cancel = CancellationToken::new();
    let err = watcher
        .wait_for_keys(
            &["stringValue\":\"syslog", "system.log"],
            Duration::from_millis(150),
            POLL,
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        WatchError::DeadlineExceeded { missing, .. } if missing == &vec!["system.log".to_string()]
    ));
    // Failure leaves the seen flag in place.
    assert!(watcher.key_occurred("stringValue\":\"syslog"));
    assert!(watcher.report().to_string().contains("[MISSING] system.log"));
}

#[tokio::test]
async fn test_drains_output_after_all_keys_seen() {
    // Far more output than a pipe buffer holds; the child only exits if the
    // watcher keeps reading after the key shows up.
    let watcher = LogWatcher::new(["first line"]).unwrap();
    let mut child = shell("echo 'first line'; i=0; while [ $i -lt 20000 ]; do echo \"filler line $i with some padding\"; i=$((i+1)); done")
        .spawn()
        .unwrap();
    let handles = watcher.attach_child(&mut child);

    let status = tokio::time::timeout(Duration::from_secs(30), child.wait())
        .await
        .expect("child blocked on a full pipe")
        .unwrap();
    assert!(status.success());

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, 20001);
    assert!(watcher.key_occurred("first line"));
}

#[tokio::test]
async fn test_blocking_attach_to_std_child() {
    let watcher = LogWatcher::new(["ready"]).unwrap();
    let mut child = std::process::Command::new("sh")
        .arg("-c")
        .arg("echo warming; echo ready")
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    let stdout = child.stdout.take().unwrap();
    let handle = watcher.attach_blocking("std-stdout", stdout).unwrap();

    let cancel = CancellationToken::new();
    watcher
        .wait_for_keys(&["ready"], Duration::from_secs(10), POLL, &cancel)
        .await
        .unwrap();
    child.wait().unwrap();
    assert_eq!(handle.join().unwrap(), 2);
}

#[tokio::test]
async fn test_exported_file_any_key() {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("testfileprocessing.json");
    let keys = KeySet::new([r#""stringValue":"syslog""#, r#""stringValue":"system.log""#]).unwrap();

    let writer_path = export.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::fs::write(&writer_path, r#"{"resourceLogs":[{"attributes":[{"stringValue":"system.log"}]}]}"#)
            .await
            .unwrap();
    });

    let cancel = CancellationToken::new();
    let result = eventually_ok(
        || scan_file(&export, &keys).map(|_| keys.any_seen()),
        Duration::from_secs(10),
        POLL,
        &cancel,
    )
    .await;

    assert_eq!(result.outcome, Outcome::Succeeded);
    assert!(result.attempts > 1);
    assert!(keys.is_seen(r#""stringValue":"system.log""#));
    assert!(!keys.all_seen());
}

#[tokio::test]
async fn test_health_probe_until_listener_binds() {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let server = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let _ = listener.accept().await;
    });

    let cancel = CancellationToken::new();
    let result = eventually_async(
        || async move { tokio::net::TcpStream::connect(addr).await.is_ok() },
        Duration::from_secs(10),
        POLL,
        &cancel,
    )
    .await;

    assert!(result.succeeded());
    server.await.unwrap();
}

#[tokio::test]
async fn test_cancel_wins_over_long_timeout() {
    let watcher = LogWatcher::new(["never printed"]).unwrap();
    let mut child = shell("echo quiet").spawn().unwrap();
    let handles = watcher.attach_child(&mut child);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = watcher
        .wait_for_keys(&["never printed"], Duration::from_secs(60), POLL, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(10));

    child.wait().await.unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    // A plain poll on an already-cancelled token does nothing.
    let mut calls = 0;
    let result = eventually(
        || {
            calls += 1;
            true
        },
        Duration::from_secs(1),
        POLL,
        &cancel,
    )
    .await;
    assert_eq!(result.outcome, Outcome::Cancelled);
    assert_eq!(calls, 0);
}
