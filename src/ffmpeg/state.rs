use serde::Serialize;
use tokio::sync::watch;

/// Externally observable session lifecycle. Cyclic, no terminal state: every
/// session ends back at `Idle` and a new start is immediately possible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    Stopping,
}

/// The single process-wide state cell. The supervisor is the only writer;
/// everyone else reads the current value or watches for transitions.
pub struct StateCell {
    tx: watch::Sender<SessionState>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Idle);
        Self { tx }
    }

    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Apply a transition if the edge is legal. Illegal edges are logged and
    /// ignored; concurrent start/stop ordering makes a stale transition
    /// attempt possible and it must not corrupt the machine.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|current| {
            if edge_allowed(*current, next) {
                *current = next;
                applied = true;
                true
            } else {
                log::warn!(
                    "State: ignoring illegal transition {:?} -> {:?}",
                    current,
                    next
                );
                false
            }
        });
        applied
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

fn edge_allowed(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    matches!(
        (from, to),
        (Idle, Starting)
            // liveness window survived
            | (Starting, Streaming)
            // process exited early, or stop during startup
            | (Starting, Idle)
            | (Starting, Stopping)
            // stop requested
            | (Streaming, Stopping)
            // process exited unexpectedly
            | (Streaming, Idle)
            // process exited after stop
            | (Stopping, Idle)
    )
}
