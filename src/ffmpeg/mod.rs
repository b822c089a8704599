//! Encoder subprocess control.
//!
//! ffmpeg is driven as an opaque external binary: this module tree builds its
//! argument vector, supervises the child process, and scrapes its text output.
//!
//! * `supervisor`: owns the single live encoder process. Start/stop/status,
//!   liveness window, graceful-then-forced termination.
//! * `command`: maps a [`command::StreamRequest`] to a concrete argv, picking a
//!   single-output or fan-out encoding profile.
//! * `parser`: line parser for the interleaved stdout/stderr streams
//!   (progress samples, buffer-overflow noise suppression).
//! * `classify`: maps accumulated stderr at exit to a failure category.
//! * `state`: the externally observable session lifecycle.
//! * `device`: scrapes `-list_devices` output into capture device names.

use std::path::{Path, PathBuf};

use tokio::process::Command;

pub mod classify;
pub mod command;
pub mod device;
pub mod parser;
pub mod state;
pub mod supervisor;

/// Session-level failures. All of them leave the control layer reusable; a new
/// start is possible as soon as the state is back to idle.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("invalid stream request: {0}")]
    InvalidRequest(String),

    #[error("an encoder session is already running")]
    AlreadyRunning,

    #[error("ffmpeg not available: {0} (install ffmpeg or place it under bin/)")]
    MissingBinary(String),

    #[error("encoder exited during startup: {0}")]
    StartupFailed(String),
}

#[cfg(windows)]
const BUNDLED_BINARY: &str = "bin/ffmpeg.exe";
#[cfg(not(windows))]
const BUNDLED_BINARY: &str = "bin/ffmpeg";

/// Resolve the encoder binary and probe it with `-version`.
///
/// Resolution order: explicit override from config, the bundled relative
/// path, then a bare `ffmpeg` resolved via `PATH`. The probe runs before
/// every start so a binary that disappeared since the last session surfaces
/// as [`StartError::MissingBinary`] instead of a spawn failure mid-start.
pub async fn locate_binary(overridden: Option<&Path>) -> Result<PathBuf, StartError> {
    let candidate = match overridden {
        Some(path) => path.to_path_buf(),
        None if Path::new(BUNDLED_BINARY).exists() => PathBuf::from(BUNDLED_BINARY),
        None => PathBuf::from("ffmpeg"),
    };

    probe_version(&candidate)
        .await
        .map_err(|e| StartError::MissingBinary(format!("{:#}", e)))?;
    Ok(candidate)
}

/// Run `<binary> -version` and check it exits cleanly.
async fn probe_version(binary: &Path) -> anyhow::Result<()> {
    let output = Command::new(binary)
        .arg("-version")
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("failed to execute {}: {}", binary.display(), e))?;

    if !output.status.success() {
        anyhow::bail!(
            "{} -version failed: {}",
            binary.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    if let Some(first) = String::from_utf8_lossy(&output.stdout).lines().next() {
        log::debug!("Encoder probe: {}", first);
    }
    Ok(())
}
