use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::events::{EVENT_CHANNEL_CAPACITY, StreamEvent};
use crate::ffmpeg::state::{SessionState, StateCell};
use crate::ffmpeg::{StartError, classify, command, parser::OutputParser};

/// A process that dies inside this window never counts as started.
const LIVENESS_WINDOW: Duration = Duration::from_secs(2);
/// How long a graceful stop may take before the child is killed outright.
const STOP_GRACE: Duration = Duration::from_millis(2500);
const STDERR_TAIL_LINES: usize = 50;
/// Exit and stream-close are independent notifications; give the readers a
/// moment to drain trailing lines before the stderr tail is snapshot.
const OUTPUT_SETTLE: Duration = Duration::from_millis(150);

/// How one encoder process ended.
#[derive(Clone, Debug, Serialize)]
pub struct ExitOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// Failure category from the stderr tail; `None` for clean and
    /// signal-only exits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classified_error: Option<String>,
}

/// Identity of one live session, returned from a successful start.
#[derive(Clone, Debug, Serialize)]
pub struct SessionHandle {
    pub id: String,
    pub pid: Option<u32>,
    pub started_at_ms: u64,
}

struct Session {
    handle: SessionHandle,
    generation: u64,
    stop: CancellationToken,
}

struct Inner {
    /// The single encoder slot. All start/stop mutation funnels through this
    /// lock; at most one child exists process-wide.
    slot: Mutex<Option<Session>>,
    state: StateCell,
    events: broadcast::Sender<StreamEvent>,
    /// Bumped per start. A waiter whose generation is stale (a newer session
    /// began while its process was still dying) must not touch the state
    /// machine.
    generation: AtomicU64,
}

/// Owns zero-or-one live encoder process and the session state machine.
///
/// Cloning is cheap and shares the same slot; the process-wide instance is
/// [`supervisor()`].
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

static SUPERVISOR: LazyLock<Supervisor> = LazyLock::new(Supervisor::new);

pub fn supervisor() -> &'static Supervisor {
    &SUPERVISOR
}

impl Supervisor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(None),
                state: StateCell::new(),
                events,
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn status(&self) -> SessionState {
        self.inner.state.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.slot.lock().await.is_some()
    }

    pub async fn current_session(&self) -> Option<SessionHandle> {
        self.inner
            .slot
            .lock()
            .await
            .as_ref()
            .map(|s| s.handle.clone())
    }

    /// Validate the request, probe the binary, spawn the encoder and hold it
    /// through the liveness window.
    ///
    /// Fails fast with no side effects on a bad request or an occupied slot;
    /// returns [`StartError::StartupFailed`] with the captured stderr tail if
    /// the process exits inside the window.
    pub async fn start(&self, request: command::StreamRequest) -> Result<SessionHandle, StartError> {
        if self.is_running().await {
            return Err(StartError::AlreadyRunning);
        }
        let argv = command::build(&request)?;
        let binary =
            crate::ffmpeg::locate_binary(crate::config::config().ffmpeg_path()).await?;
        self.start_with(&binary, argv).await
    }

    /// Spawn `binary` with a prebuilt argv and supervise it. `start` is the
    /// only production caller; tests drive this directly to substitute a
    /// harmless binary.
    pub(crate) async fn start_with(
        &self,
        binary: &Path,
        argv: Vec<String>,
    ) -> Result<SessionHandle, StartError> {
        let mut slot = self.inner.slot.lock().await;
        if slot.is_some() {
            return Err(StartError::AlreadyRunning);
        }

        log::info!("Supervisor: spawning {} {:?}", binary.display(), argv);
        let mut child = Command::new(binary)
            .args(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StartError::MissingBinary(e.to_string()))?;

        let handle = SessionHandle {
            id: uuid::Uuid::new_v4().to_string(),
            pid: child.id(),
            started_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        };
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let stop = CancellationToken::new();
        let tail = Arc::new(StdMutex::new(VecDeque::new()));
        let (exit_tx, mut exit_rx) = watch::channel(None::<ExitOutcome>);

        let stdin = child.stdin.take();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, "stdout", self.inner.events.clone(), None);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(
                stderr,
                "stderr",
                self.inner.events.clone(),
                Some(Arc::clone(&tail)),
            );
        }

        // The previous session may still be winding down after an eager stop;
        // its waiter is stale now and will skip the machine.
        if self.inner.state.current() == SessionState::Stopping {
            self.inner.state.transition(SessionState::Idle);
            self.emit(StreamEvent::Status {
                status: SessionState::Idle,
            });
        }
        self.inner.state.transition(SessionState::Starting);
        self.emit(StreamEvent::Status {
            status: SessionState::Starting,
        });

        *slot = Some(Session {
            handle: handle.clone(),
            generation,
            stop: stop.clone(),
        });
        drop(slot);

        self.spawn_waiter(child, stdin, stop, generation, handle.id.clone(), tail.clone(), exit_tx);

        match tokio::time::timeout(LIVENESS_WINDOW, exit_rx.changed()).await {
            Ok(_) => {
                let tail_text = tail_text(&tail);
                log::error!("Supervisor: encoder died during startup: {}", tail_text);
                Err(StartError::StartupFailed(tail_text))
            }
            Err(_) => {
                if self.inner.state.current() == SessionState::Starting {
                    self.inner.state.transition(SessionState::Streaming);
                    self.emit(StreamEvent::Status {
                        status: SessionState::Streaming,
                    });
                    log::info!(
                        "Supervisor: encoder up (pid {:?}), streaming",
                        handle.pid
                    );
                    Ok(handle)
                } else {
                    // stop() intervened inside the window.
                    Err(StartError::StartupFailed(
                        "session was stopped during startup".into(),
                    ))
                }
            }
        }
    }

    /// Request a stop. No-op when no process is owned.
    ///
    /// The slot is released eagerly: a new start is possible immediately,
    /// even while the old process is still winding down under the grace
    /// timer.
    pub async fn stop(&self) {
        let session = self.inner.slot.lock().await.take();
        let Some(session) = session else {
            log::debug!("Supervisor: stop requested with no live encoder");
            return;
        };
        log::info!("Supervisor: stopping encoder (pid {:?})", session.handle.pid);
        if self.inner.state.transition(SessionState::Stopping) {
            self.emit(StreamEvent::Status {
                status: SessionState::Stopping,
            });
        }
        session.stop.cancel();
    }

    fn emit(&self, event: StreamEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Watch the child until it exits, then classify, notify and converge the
    /// state machine. Runs independently of the line readers: trailing output
    /// may still arrive after the exit event and that is fine.
    #[allow(clippy::too_many_arguments)]
    fn spawn_waiter(
        &self,
        child: Child,
        stdin: Option<ChildStdin>,
        stop: CancellationToken,
        generation: u64,
        session_id: String,
        tail: Arc<StdMutex<VecDeque<String>>>,
        exit_tx: watch::Sender<Option<ExitOutcome>>,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let status = wait_for_exit(child, stdin, &stop).await;
            tokio::time::sleep(OUTPUT_SETTLE).await;
            let outcome = build_outcome(status, &tail);
            let _ = exit_tx.send(Some(outcome.clone()));

            {
                let mut slot = inner.slot.lock().await;
                if slot.as_ref().is_some_and(|s| s.handle.id == session_id) {
                    *slot = None;
                }
            }

            log::info!(
                "Supervisor: encoder exited (code={:?}, signal={:?})",
                outcome.exit_code,
                outcome.signal
            );
            let _ = inner.events.send(StreamEvent::Exited {
                outcome: outcome.clone(),
            });

            if inner.generation.load(Ordering::SeqCst) != generation {
                // A newer session owns the state machine.
                return;
            }

            match inner.state.current() {
                SessionState::Starting => {
                    let category = outcome.classified_error.clone().unwrap_or_else(|| {
                        "Encoder exited before streaming started".to_string()
                    });
                    inner.state.transition(SessionState::Idle);
                    let _ = inner.events.send(StreamEvent::Error { category });
                    let _ = inner.events.send(StreamEvent::Status {
                        status: SessionState::Idle,
                    });
                }
                SessionState::Streaming => {
                    inner.state.transition(SessionState::Idle);
                    if let Some(category) = outcome.classified_error.clone() {
                        let _ = inner.events.send(StreamEvent::Error { category });
                    }
                    let _ = inner.events.send(StreamEvent::Status {
                        status: SessionState::Idle,
                    });
                }
                SessionState::Stopping => {
                    inner.state.transition(SessionState::Idle);
                    let _ = inner.events.send(StreamEvent::Status {
                        status: SessionState::Idle,
                    });
                }
                SessionState::Idle => {
                    log::warn!("Supervisor: exit observed while already idle");
                }
            }
        });
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for natural exit, or run the graceful-then-forced stop sequence once
/// the stop token fires: `q` on stdin (ffmpeg's interactive quit, finalizes
/// the outputs), then a hard kill after the grace period.
async fn wait_for_exit(
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    stop: &CancellationToken,
) -> std::io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => return status,
        _ = stop.cancelled() => {}
    }

    // Stop requested: graceful first, forced after the grace period.
    if let Some(stdin) = stdin.as_mut() {
        if let Err(e) = stdin.write_all(b"q").await {
            log::debug!("Supervisor: could not send quit key: {}", e);
        } else {
            let _ = stdin.flush().await;
        }
    }
    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            log::warn!("Supervisor: encoder ignored graceful stop, killing it");
            child.kill().await?;
            child.wait().await
        }
    }
}

fn build_outcome(
    status: std::io::Result<ExitStatus>,
    tail: &StdMutex<VecDeque<String>>,
) -> ExitOutcome {
    match status {
        Ok(status) => {
            let exit_code = status.code();
            #[cfg(unix)]
            let signal = std::os::unix::process::ExitStatusExt::signal(&status);
            #[cfg(not(unix))]
            let signal: Option<i32> = None;

            // Signal-only exits carry no code and are not classified here;
            // the transport decides how to surface them.
            let classified_error = match exit_code {
                Some(code) if code != 0 => {
                    Some(classify::classify(&tail_text(tail)).to_string())
                }
                _ => None,
            };
            ExitOutcome {
                exit_code,
                signal,
                classified_error,
            }
        }
        Err(e) => {
            log::error!("Supervisor: wait on encoder failed: {}", e);
            ExitOutcome {
                exit_code: None,
                signal: None,
                classified_error: None,
            }
        }
    }
}

/// Line reader for one of the child's output streams. Each stream gets its
/// own parser; the buffer-pressure streak tracking is per stream, which
/// matches where ffmpeg actually emits it (stderr).
fn spawn_reader<R>(
    reader: R,
    source: &'static str,
    events: broadcast::Sender<StreamEvent>,
    tail: Option<Arc<StdMutex<VecDeque<String>>>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut parser = OutputParser::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(tail) = &tail {
                push_tail(tail, &line);
            }
            let (display, sample) = parser.feed(&line);
            if let Some(sample) = sample {
                let _ = events.send(StreamEvent::Progress { sample });
            }
            if let Some(display) = display {
                log::debug!("Encoder ({}): {}", source, display);
                let _ = events.send(StreamEvent::Log { line: display });
            }
        }
        log::debug!("Encoder {} closed", source);
    });
}

fn push_tail(tail: &StdMutex<VecDeque<String>>, line: &str) {
    let mut tail = tail.lock().unwrap_or_else(|e| e.into_inner());
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line.to_string());
}

fn tail_text(tail: &StdMutex<VecDeque<String>>) -> String {
    let tail = tail.lock().unwrap_or_else(|e| e.into_inner());
    if tail.is_empty() {
        "no diagnostic output captured".to_string()
    } else {
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod supervisor_test;
