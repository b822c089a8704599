use serde::Serialize;

/// Partial snapshot of encoder throughput parsed from one status line. ffmpeg
/// emits whichever tokens it has; every field here is optional and a sample is
/// only produced when at least one of fps/bitrate/time was present.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProgressSample {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_kb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl ProgressSample {
    /// frame/size/speed alone are secondary fields and not worth an event.
    fn is_reportable(&self) -> bool {
        self.fps.is_some() || self.bitrate_kbps.is_some() || self.elapsed_seconds.is_some()
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub const OVERFLOW_WARNING: &str =
    "Capture buffer overflowing, the encoder is dropping frames";

/// Line-oriented parser for the encoder's stdout/stderr.
///
/// Stateless for progress values, stateful for noise suppression: dshow spams
/// the real-time buffer diagnostic on every frame while the buffer is under
/// pressure, so only the first line of a streak is surfaced (reworded) and
/// repeats are dropped until a non-matching line ends the streak.
pub struct OutputParser {
    in_overflow_streak: bool,
}

impl OutputParser {
    pub fn new() -> Self {
        Self {
            in_overflow_streak: false,
        }
    }

    /// Returns the line to surface on the display channel (if any) and the
    /// progress sample extracted from it (if any).
    pub fn feed(&mut self, line: &str) -> (Option<String>, Option<ProgressSample>) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return (None, None);
        }

        if is_buffer_overflow(trimmed) {
            if self.in_overflow_streak {
                return (None, None);
            }
            self.in_overflow_streak = true;
            return (Some(OVERFLOW_WARNING.to_string()), None);
        }
        self.in_overflow_streak = false;

        let sample = parse_progress(trimmed);
        (Some(trimmed.to_string()), sample)
    }
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new()
    }
}

fn is_buffer_overflow(line: &str) -> bool {
    line.contains("real-time buffer") && line.contains("too full")
}

fn parse_progress(line: &str) -> Option<ProgressSample> {
    let sample = ProgressSample {
        frame: extract_value(line, "frame=").and_then(|v| v.parse().ok()),
        fps: extract_value(line, "fps=").and_then(parse_f64),
        bitrate_kbps: extract_value(line, "bitrate=")
            .and_then(|v| parse_f64(v.trim_end_matches("kbits/s").to_string())),
        elapsed_seconds: extract_value(line, "time=").and_then(|v| parse_clock(&v)),
        size_kb: extract_value(line, "size=")
            .and_then(|v| v.trim_end_matches("kB").parse().ok()),
        speed: extract_value(line, "speed=")
            .and_then(|v| parse_f64(v.trim_end_matches('x').to_string())),
    };

    if sample.is_empty() || !sample.is_reportable() {
        None
    } else {
        Some(sample)
    }
}

/// Value of a `key=` token, tolerating the padding ffmpeg puts between the
/// key and the value (`fps= 30.0`).
fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)? + key.len();
    let rest = line[start..].trim_start();
    let end = rest
        .find(|c: char| c.is_whitespace())
        .unwrap_or(rest.len());
    let value = &rest[..end];
    if value.is_empty() || value == "N/A" {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_f64(value: String) -> Option<f64> {
    value.parse().ok()
}

/// `HH:MM:SS.ff` to whole elapsed seconds.
fn parse_clock(value: &str) -> Option<u64> {
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds as u64)
}
