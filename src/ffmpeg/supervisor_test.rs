use std::path::Path;
use std::time::Duration;

use tokio::sync::broadcast;

use super::*;
use crate::ffmpeg::command::{Destination, StreamRequest};

/// Tests drive `start_with` directly so a plain shell stands in for the
/// encoder binary.
fn sh() -> &'static Path {
    Path::new("/bin/sh")
}

fn sh_argv(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

fn sh_missing() -> bool {
    if sh().exists() {
        false
    } else {
        eprintln!("skip: /bin/sh not found");
        true
    }
}

/// Drain events until the idle status arrives (or a timeout gives up).
async fn collect_until_idle(rx: &mut broadcast::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Ok(event)) => {
                let done = matches!(
                    event,
                    StreamEvent::Status {
                        status: SessionState::Idle
                    }
                );
                events.push(event);
                if done {
                    return events;
                }
            }
            _ => return events,
        }
    }
}

fn statuses(events: &[StreamEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Status { status } => Some(*status),
            _ => None,
        })
        .collect()
}

fn error_categories(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Error { category } => Some(category.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_successful_session_walks_full_cycle() {
    if sh_missing() {
        return;
    }
    let sup = Supervisor::new();
    let mut rx = sup.subscribe();

    let handle = sup
        .start_with(sh(), sh_argv("sleep 30"))
        .await
        .expect("start");
    assert!(handle.pid.is_some());
    assert_eq!(sup.status(), SessionState::Streaming);
    assert!(sup.is_running().await);

    sup.stop().await;
    assert!(!sup.is_running().await);

    let events = collect_until_idle(&mut rx).await;
    assert_eq!(
        statuses(&events),
        vec![
            SessionState::Starting,
            SessionState::Streaming,
            SessionState::Stopping,
            SessionState::Idle,
        ]
    );
    // Deliberate stop is not a failure.
    assert!(error_categories(&events).is_empty());
    assert_eq!(sup.status(), SessionState::Idle);
}

#[tokio::test]
async fn test_exit_inside_liveness_window_fails_start() {
    if sh_missing() {
        return;
    }
    let sup = Supervisor::new();
    let mut rx = sup.subscribe();

    let err = sup
        .start_with(sh(), sh_argv("echo boom >&2; exit 1"))
        .await
        .expect_err("must fail");
    match err {
        StartError::StartupFailed(tail) => assert!(tail.contains("boom"), "tail: {}", tail),
        other => panic!("expected StartupFailed, got {:?}", other),
    }

    let events = collect_until_idle(&mut rx).await;
    // Streaming is never observed.
    assert_eq!(
        statuses(&events),
        vec![SessionState::Starting, SessionState::Idle]
    );
    assert_eq!(error_categories(&events).len(), 1);
    assert!(!sup.is_running().await);
    assert_eq!(sup.status(), SessionState::Idle);
}

#[tokio::test]
async fn test_second_start_fails_already_running() {
    if sh_missing() {
        return;
    }
    let sup = Supervisor::new();
    sup.start_with(sh(), sh_argv("sleep 30"))
        .await
        .expect("first start");

    let err = sup
        .start_with(sh(), sh_argv("sleep 30"))
        .await
        .expect_err("second start must fail");
    assert!(matches!(err, StartError::AlreadyRunning));
    // First session untouched.
    assert_eq!(sup.status(), SessionState::Streaming);
    assert!(sup.is_running().await);

    let mut rx = sup.subscribe();
    sup.stop().await;
    collect_until_idle(&mut rx).await;
}

#[tokio::test]
async fn test_stop_when_idle_is_a_noop() {
    let sup = Supervisor::new();
    let mut rx = sup.subscribe();
    sup.stop().await;
    assert_eq!(sup.status(), SessionState::Idle);
    assert!(matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn test_runtime_failure_is_classified_and_returns_to_idle() {
    if sh_missing() {
        return;
    }
    let sup = Supervisor::new();
    let mut rx = sup.subscribe();

    // Survives the liveness window, then dies like a dropped ingest.
    sup.start_with(sh(), sh_argv("sleep 3; echo 'Connection refused' >&2; exit 1"))
        .await
        .expect("start");

    let events = collect_until_idle(&mut rx).await;
    assert_eq!(
        statuses(&events),
        vec![
            SessionState::Starting,
            SessionState::Streaming,
            SessionState::Idle,
        ]
    );
    assert_eq!(
        error_categories(&events),
        vec!["The streaming server refused the connection".to_string()]
    );

    let exited = events.iter().find_map(|e| match e {
        StreamEvent::Exited { outcome } => Some(outcome.clone()),
        _ => None,
    });
    let exited = exited.expect("exit outcome event");
    assert_eq!(exited.exit_code, Some(1));
    assert!(exited.classified_error.is_some());
}

#[tokio::test]
async fn test_stop_during_starting_converges_to_idle() {
    if sh_missing() {
        return;
    }
    let sup = Supervisor::new();
    let mut rx = sup.subscribe();

    let starter = sup.clone();
    let start_task =
        tokio::spawn(async move { starter.start_with(sh(), sh_argv("sleep 30")).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    sup.stop().await;

    let result = start_task.await.expect("join");
    assert!(matches!(result, Err(StartError::StartupFailed(_))));

    collect_until_idle(&mut rx).await;
    assert_eq!(sup.status(), SessionState::Idle);
    assert!(!sup.is_running().await);
}

#[tokio::test]
async fn test_invalid_request_spawns_nothing() {
    let sup = Supervisor::new();
    let request = StreamRequest {
        video_device: String::new(),
        audio_device: "Microphone".to_string(),
        destinations: vec![Destination::new("rtmp://a/x")],
    };
    let err = sup.start(request).await.expect_err("must fail");
    assert!(matches!(err, StartError::InvalidRequest(_)));
    assert!(!sup.is_running().await);
    assert_eq!(sup.status(), SessionState::Idle);
}

#[tokio::test]
async fn test_signal_kill_is_not_classified() {
    if sh_missing() {
        return;
    }
    let sup = Supervisor::new();
    let mut rx = sup.subscribe();
    sup.start_with(sh(), sh_argv("sleep 30")).await.expect("start");
    sup.stop().await;

    let events = collect_until_idle(&mut rx).await;
    let exited = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::Exited { outcome } => Some(outcome.clone()),
            _ => None,
        })
        .expect("exit outcome event");
    // Forced kill: signal-only exit, no code, no classification.
    assert_eq!(exited.exit_code, None);
    #[cfg(unix)]
    assert!(exited.signal.is_some());
    assert!(exited.classified_error.is_none());
}
