//! Process supervisor integration tests
//!
//! These spawn real (tiny) processes and therefore only run on unix.
#![cfg(unix)]

use std::time::Duration;

use assert_matches::assert_matches;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use classcast::supervisor::{
    LaunchSpec, MarkerHook, ProcessSupervisor, SessionState, StdinFeed, StopOutcome,
};
use classcast::StreamError;
use classcast_common::{SessionKey, StreamId};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn sh(key: &str, script: &str, dir: &std::path::Path) -> LaunchSpec {
    LaunchSpec::new(
        SessionKey::from(key),
        vec!["sh".into(), "-c".into(), script.into()],
        dir,
    )
}

async fn wait_until_gone(supervisor: &ProcessSupervisor, key: &SessionKey) {
    for _ in 0..100 {
        if !supervisor.contains(key) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("session {key} never left the registry");
}

#[tokio::test]
async fn test_duplicate_key_is_rejected() {
    let dir = tempdir().unwrap();
    let supervisor = ProcessSupervisor::default();
    let cancel = CancellationToken::new();

    supervisor.start(sh("sess7", "sleep 30", dir.path())).await.unwrap();
    assert_eq!(supervisor.state(&SessionKey::from("sess7")), Some(SessionState::Streaming));

    let err = supervisor
        .start(sh("sess7", "sleep 30", dir.path()))
        .await
        .unwrap_err();
    assert_matches!(err, StreamError::AlreadyRunning(_));
    assert_eq!(supervisor.len(), 1);

    supervisor.stop(&SessionKey::from("sess7"), &cancel).await.unwrap();
}

#[tokio::test]
async fn test_stop_without_start_is_noop() {
    let supervisor = ProcessSupervisor::default();
    let key = StreamId::parse("user42_sess7").unwrap().session_key();

    let outcome = supervisor.stop(&key, &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, StopOutcome::NotRunning);
    assert!(supervisor.is_empty());
}

#[tokio::test]
async fn test_graceful_stop_removes_key() {
    let dir = tempdir().unwrap();
    let supervisor = ProcessSupervisor::default();
    let key = SessionKey::from("graceful");

    supervisor.start(sh("graceful", "exec sleep 30", dir.path())).await.unwrap();
    let outcome = supervisor.stop(&key, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, StopOutcome::Graceful);
    assert!(!supervisor.contains(&key));
}

#[tokio::test]
async fn test_unresponsive_process_is_killed() {
    let dir = tempdir().unwrap();
    let supervisor = ProcessSupervisor::default();
    let key = SessionKey::from("stubborn");

    supervisor
        .start(sh(
            "stubborn",
            "trap '' TERM; echo armed; while true; do sleep 0.1; done",
            dir.path(),
        ))
        .await
        .unwrap();
    // Give the shell time to install the trap.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let outcome = supervisor
        .stop_with_grace(&key, Duration::from_millis(200), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, StopOutcome::Killed);
    assert!(!supervisor.contains(&key));
}

#[tokio::test]
async fn test_interrupted_stop_still_terminates() {
    let dir = tempdir().unwrap();
    let supervisor = ProcessSupervisor::default();
    let key = SessionKey::from("interrupted");
    supervisor.start(sh("interrupted", "exec sleep 30", dir.path())).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = supervisor.stop(&key, &cancel).await.unwrap_err();

    assert_matches!(err, StreamError::Interrupted(_));
    assert!(cancel.is_cancelled());
    wait_until_gone(&supervisor, &key).await;
}

#[tokio::test]
async fn test_key_is_reusable_after_exit() {
    let dir = tempdir().unwrap();
    let supervisor = ProcessSupervisor::default();

    let first = supervisor.start(sh("reuse", "exit 0", dir.path())).await.unwrap();
    let report = first.wait().await.unwrap();
    assert!(report.success());
    assert!(!report.stopped);
    assert!(!supervisor.contains(&SessionKey::from("reuse")));

    let second = supervisor.start(sh("reuse", "exit 0", dir.path())).await.unwrap();
    assert!(second.wait().await.unwrap().success());
}

#[tokio::test]
async fn test_failure_report_carries_output() {
    let dir = tempdir().unwrap();
    let supervisor = ProcessSupervisor::default();

    let launched = supervisor
        .start(sh("fails", "echo 'invalid stream map' >&2; exit 3", dir.path()))
        .await
        .unwrap();
    let report = launched.wait().await.unwrap();

    assert!(!report.success());
    assert!(report.describe().contains("invalid stream map"));
}

#[tokio::test]
async fn test_stdin_fed_on_marker() {
    let dir = tempdir().unwrap();
    let supervisor = ProcessSupervisor::default();

    let spec = sh("marker", "echo 'waiting for descriptor'; read line; echo \"got $line\"", dir.path())
        .stdin(StdinFeed::OnMarker {
            marker: "waiting for descriptor".into(),
            payload: b"v=0\n".to_vec(),
        });
    let report = supervisor.start(spec).await.unwrap().wait().await.unwrap();

    assert!(report.success());
    assert!(report.tail.iter().any(|l| l == "got v=0"));
}

#[tokio::test]
async fn test_non_utf8_output_keeps_draining() {
    let dir = tempdir().unwrap();
    let supervisor = ProcessSupervisor::default();
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();

    let spec = sh(
        "bytes",
        r"printf 'bad \377 byte\n'; sleep 0.2; echo READY",
        dir.path(),
    )
    .observer(MarkerHook::new("READY", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));
    let report = supervisor.start(spec).await.unwrap().wait().await.unwrap();

    assert!(report.success(), "{}", report.describe());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(report.tail.last().map(String::as_str), Some("READY"));
    assert!(report.tail[0].starts_with("bad "));
}

#[tokio::test]
async fn test_stdin_fed_immediately() {
    let dir = tempdir().unwrap();
    let supervisor = ProcessSupervisor::default();

    let spec = LaunchSpec::new(SessionKey::from("cat"), vec!["cat".into()], dir.path())
        .stdin(StdinFeed::Immediately(b"m=video 5004 RTP/AVP 96\n".to_vec()));
    let report = supervisor.start(spec).await.unwrap().wait().await.unwrap();

    assert!(report.success());
    assert_eq!(report.tail, vec!["m=video 5004 RTP/AVP 96".to_string()]);
}

#[tokio::test]
async fn test_work_dir_is_created() {
    let dir = tempdir().unwrap();
    let work = dir.path().join("7/3");
    let supervisor = ProcessSupervisor::default();

    let report = supervisor
        .start(sh("mkdir", "pwd", &work))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert!(work.is_dir());
    assert!(report.success());
}

#[tokio::test]
async fn test_stop_all() {
    let dir = tempdir().unwrap();
    let supervisor = ProcessSupervisor::default();
    for key in ["a", "b", "c"] {
        supervisor.start(sh(key, "exec sleep 30", dir.path())).await.unwrap();
    }
    assert_eq!(supervisor.list().len(), 3);

    supervisor.stop_all(&CancellationToken::new()).await;
    assert!(supervisor.is_empty());
}
