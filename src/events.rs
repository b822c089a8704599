use serde::Serialize;

use crate::ffmpeg::parser::ProgressSample;
use crate::ffmpeg::state::SessionState;
use crate::ffmpeg::supervisor::ExitOutcome;

/// Events (Supervisor → transport). One broadcast channel carries all of
/// them; channel order within one channel is delivery order, interleaving
/// across concerns is not guaranteed to observers joining late.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Push notification relayed to every connected observer, serialized as a
/// tagged JSON object over the WebSocket.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Lifecycle transition.
    Status { status: SessionState },
    /// Throughput snapshot parsed from the encoder's status line.
    Progress {
        #[serde(flatten)]
        sample: ProgressSample,
    },
    /// Display line from the encoder (noise-filtered).
    Log { line: String },
    /// Human-readable failure category, emitted at most once per session.
    Error { category: String },
    /// The encoder process ended; emitted exactly once per process lifetime.
    Exited {
        #[serde(flatten)]
        outcome: ExitOutcome,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_event_json_shape() {
        let json = serde_json::to_value(StreamEvent::Status {
            status: SessionState::Starting,
        })
        .unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"], "starting");
    }

    #[test]
    fn test_progress_event_flattens_sample() {
        let json = serde_json::to_value(StreamEvent::Progress {
            sample: ProgressSample {
                fps: Some(30.0),
                elapsed_seconds: Some(41),
                ..Default::default()
            },
        })
        .unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["fps"], 30.0);
        assert_eq!(json["elapsed_seconds"], 41);
        assert!(json.get("bitrate_kbps").is_none());
    }
}
