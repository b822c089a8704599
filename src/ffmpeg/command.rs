use serde::{Deserialize, Serialize};

use crate::ffmpeg::StartError;

/// One streaming destination (platform ingest URL plus an optional display
/// label). The URL scheme decides per-output flags: `rtmps://` outputs get the
/// publish connection option appended to their argument group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Destination {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Destination {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: None,
        }
    }

    /// TLS-wrapped publish protocol.
    pub fn is_secure(&self) -> bool {
        self.url.starts_with("rtmps://")
    }
}

/// A start request: capture device names plus the ordered destination list.
/// Both device names must be non-empty and at least one destination is
/// required; [`build`] rejects anything else before a process is spawned.
#[derive(Clone, Debug, Deserialize)]
pub struct StreamRequest {
    pub video_device: String,
    pub audio_device: String,
    pub destinations: Vec<Destination>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    Single,
    MultiOutput,
}

/// Derived, immutable encoding configuration for one session.
///
/// The single-destination profile targets interactive/low-delay delivery; the
/// fan-out profile lowers the per-destination ladder to bound aggregate CPU
/// and upstream bandwidth. The exact numbers are tunable policy.
#[derive(Clone, Debug)]
pub struct EncodingProfile {
    pub mode: OutputMode,
    pub video_bitrate_kbps: u32,
    pub resolution: (u32, u32),
    pub preset: &'static str,
    pub buffer_size_kbits: u32,
    pub frame_rate: u32,
}

/// Per-destination quality tier in MultiOutput mode. `scale_height` of `None`
/// keeps the capture resolution.
#[derive(Clone, Copy, Debug)]
pub struct OutputTier {
    pub video_bitrate_kbps: u32,
    pub scale_height: Option<u32>,
}

const SINGLE_VIDEO_KBPS: u32 = 800;
const MULTI_SECONDARY_KBPS: u32 = 400;
const MULTI_SECONDARY_HEIGHT: u32 = 480;
const AUDIO_KBPS: u32 = 128;
const FRAME_RATE: u32 = 30;
// Keyframe every 2 seconds so receiving platforms can cut in quickly after a
// reconnect.
const GOP_FRAMES: u32 = 60;
const RECONNECT_DELAY_MAX_SECS: u32 = 5;

impl EncodingProfile {
    pub fn for_request(request: &StreamRequest) -> Self {
        let mode = if request.destinations.len() > 1 {
            OutputMode::MultiOutput
        } else {
            OutputMode::Single
        };
        Self {
            mode,
            video_bitrate_kbps: SINGLE_VIDEO_KBPS,
            resolution: (1280, 720),
            preset: "veryfast",
            buffer_size_kbits: SINGLE_VIDEO_KBPS * 2,
            frame_rate: FRAME_RATE,
        }
    }

    /// Quality tier for the destination at `index`. The first destination gets
    /// the full ladder, later ones a reduced bitrate and resolution.
    pub fn tier_for(&self, index: usize) -> OutputTier {
        if self.mode == OutputMode::Single || index == 0 {
            OutputTier {
                video_bitrate_kbps: self.video_bitrate_kbps,
                scale_height: None,
            }
        } else {
            OutputTier {
                video_bitrate_kbps: MULTI_SECONDARY_KBPS,
                scale_height: Some(MULTI_SECONDARY_HEIGHT),
            }
        }
    }
}

/// Build the full ffmpeg argv for a request.
///
/// The result is a flat vector handed to process creation as-is; nothing is
/// ever joined into a shell string, so device names and URLs with spaces or
/// shell metacharacters stay inert.
pub fn build(request: &StreamRequest) -> Result<Vec<String>, StartError> {
    validate(request)?;
    let profile = EncodingProfile::for_request(request);

    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-y".into(),
        "-f".into(),
        "dshow".into(),
        "-rtbufsize".into(),
        "256M".into(),
        "-framerate".into(),
        profile.frame_rate.to_string(),
        "-i".into(),
        format!(
            "video={}:audio={}",
            request.video_device, request.audio_device
        ),
    ];

    match profile.mode {
        OutputMode::Single => {
            args.push("-map".into());
            args.push("0:v".into());
            args.push("-map".into());
            args.push("0:a".into());
            push_output_group(&mut args, &profile, 0, &request.destinations[0]);
        }
        OutputMode::MultiOutput => {
            // One capture open, one process: duplicate the video through a
            // split filter and encode one tier per destination. Most capture
            // backends refuse a second concurrent open of the same device.
            args.push("-filter_complex".into());
            args.push(fan_out_graph(&profile, request.destinations.len()));
            for (i, dest) in request.destinations.iter().enumerate() {
                args.push("-map".into());
                args.push(format!("[{}]", video_pad(&profile, i)));
                args.push("-map".into());
                args.push("0:a".into());
                push_output_group(&mut args, &profile, i, dest);
            }
        }
    }

    Ok(args)
}

fn validate(request: &StreamRequest) -> Result<(), StartError> {
    if request.video_device.trim().is_empty() {
        return Err(StartError::InvalidRequest(
            "video device name is empty".into(),
        ));
    }
    if request.audio_device.trim().is_empty() {
        return Err(StartError::InvalidRequest(
            "audio device name is empty".into(),
        ));
    }
    if request.destinations.is_empty() {
        return Err(StartError::InvalidRequest("no destinations".into()));
    }
    if let Some(bad) = request
        .destinations
        .iter()
        .find(|d| d.url.trim().is_empty())
    {
        return Err(StartError::InvalidRequest(format!(
            "destination {:?} has an empty url",
            bad.label.as_deref().unwrap_or("<unlabeled>")
        )));
    }
    Ok(())
}

/// `[0:v]split=N[s0][s1]...;[s1]scale=-2:480[v1];...` where pad `v{i}` is the
/// encode input for destination `i` (`s0` stays unscaled for the first tier).
fn fan_out_graph(profile: &EncodingProfile, outputs: usize) -> String {
    let mut graph = format!("[0:v]split={}", outputs);
    for i in 0..outputs {
        graph.push_str(&format!("[s{}]", i));
    }
    for i in 0..outputs {
        if let Some(height) = profile.tier_for(i).scale_height {
            graph.push_str(&format!(";[s{}]scale=-2:{}[v{}]", i, height, i));
        }
    }
    graph
}

fn video_pad(profile: &EncodingProfile, index: usize) -> String {
    if profile.tier_for(index).scale_height.is_some() {
        format!("v{}", index)
    } else {
        format!("s{}", index)
    }
}

/// Encoder and muxer options for one destination, terminated by its URL.
/// Options placed here apply to the next output file only.
fn push_output_group(
    args: &mut Vec<String>,
    profile: &EncodingProfile,
    index: usize,
    dest: &Destination,
) {
    let tier = profile.tier_for(index);
    let bitrate = format!("{}k", tier.video_bitrate_kbps);

    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        profile.preset.to_string(),
        "-tune".to_string(),
        "zerolatency".to_string(),
        "-b:v".to_string(),
        bitrate.clone(),
        "-maxrate".to_string(),
        bitrate,
        "-bufsize".to_string(),
        format!("{}k", tier.video_bitrate_kbps * 2),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-g".to_string(),
        GOP_FRAMES.to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", AUDIO_KBPS),
        "-ar".to_string(),
        "44100".to_string(),
    ]);

    if dest.is_secure() {
        // Publish-mode connection option for TLS ingest endpoints.
        args.push("-rtmp_live".into());
        args.push("live".into());
    }

    // Destinations are long-lived network sinks; let the muxer ride out
    // short drops instead of aborting the whole session.
    args.extend([
        "-reconnect".to_string(),
        "1".to_string(),
        "-reconnect_streamed".to_string(),
        "1".to_string(),
        "-reconnect_delay_max".to_string(),
        RECONNECT_DELAY_MAX_SECS.to_string(),
        "-f".to_string(),
        "flv".to_string(),
        dest.url.clone(),
    ]);
}
