use std::path::Path;

use serde::Serialize;
use tokio::process::Command;

/// Capture device names, as enumerated by the encoder binary itself.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DeviceList {
    pub video: Vec<String>,
    pub audio: Vec<String>,
}

/// Enumerate capture devices via `ffmpeg -list_devices`.
///
/// The listing run always exits non-zero (the dummy input never opens) and the
/// device table lands on stderr. Any failure collapses to an empty list:
/// callers substitute placeholder names, a broken enumeration must never take
/// the control plane down.
pub async fn list_devices(binary: &Path) -> DeviceList {
    let output = Command::new(binary)
        .args([
            "-hide_banner",
            "-list_devices",
            "true",
            "-f",
            "dshow",
            "-i",
            "dummy",
        ])
        .output()
        .await;

    match output {
        Ok(output) => parse_listing(&String::from_utf8_lossy(&output.stderr)),
        Err(e) => {
            log::warn!("Device: listing failed: {}", e);
            DeviceList::default()
        }
    }
}

/// Scrape quoted device names tagged `(video)` / `(audio)` out of the
/// listing transcript:
///
/// ```text
/// [dshow @ 0x1] "Integrated Camera" (video)
/// [dshow @ 0x1]   Alternative name "@device_pnp_..."
/// [dshow @ 0x1] "Microphone (Realtek Audio)" (audio)
/// ```
pub(crate) fn parse_listing(text: &str) -> DeviceList {
    let mut list = DeviceList::default();
    for line in text.lines() {
        if line.contains("Alternative name") {
            continue;
        }
        let Some(start) = line.find('"') else {
            continue;
        };
        let rest = &line[start + 1..];
        let Some(end) = rest.rfind('"') else {
            continue;
        };
        let name = &rest[..end];
        let tail = &rest[end + 1..];
        if name.is_empty() {
            continue;
        }
        if tail.contains("(video)") {
            list.video.push(name.to_string());
        } else if tail.contains("(audio)") {
            list.audio.push(name.to_string());
        }
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSCRIPT: &str = r#"[dshow @ 000001ff] "Integrated Camera" (video)
[dshow @ 000001ff]   Alternative name "@device_pnp_\\?\usb#vid_04f2"
[dshow @ 000001ff] "OBS Virtual Camera" (video)
[dshow @ 000001ff] "Microphone (Realtek Audio)" (audio)
[dshow @ 000001ff]   Alternative name "@device_cm_{33D9A762}"
dummy: Immediate exit requested
"#;

    #[test]
    fn test_parse_listing() {
        let list = parse_listing(TRANSCRIPT);
        assert_eq!(list.video, vec!["Integrated Camera", "OBS Virtual Camera"]);
        assert_eq!(list.audio, vec!["Microphone (Realtek Audio)"]);
    }

    #[test]
    fn test_empty_transcript() {
        let list = parse_listing("");
        assert!(list.video.is_empty());
        assert!(list.audio.is_empty());
    }

    #[test]
    fn test_untagged_quotes_are_ignored() {
        let list = parse_listing("error opening \"dummy\" as input\n");
        assert!(list.video.is_empty());
        assert!(list.audio.is_empty());
    }
}
