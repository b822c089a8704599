//! Failure classification over the accumulated stderr of one encoder run.
//!
//! Advisory, UX-oriented mapping. Rules are evaluated top to bottom and the
//! first hit wins, so more specific network failures sit above the broader
//! ones. New patterns are additive rows, not new branches.

type Rule = (&'static [&'static str], &'static str);

/// Patterns are matched case-insensitively as substrings.
const RULES: &[Rule] = &[
    (
        &[
            "connection timed out",
            "connection reset",
            "broken pipe",
            "network is unreachable",
            "end of file",
        ],
        "Network connection to the streaming server was lost",
    ),
    (
        &["connection refused"],
        "The streaming server refused the connection",
    ),
    (
        &[
            "could not find video device",
            "could not find audio only device",
            "no such device",
        ],
        "Capture device not found",
    ),
    (
        &["permission denied", "operation not permitted"],
        "Permission denied for the capture device or destination",
    ),
    (
        &["device or resource busy", "in use by another"],
        "Capture device is busy (in use by another application)",
    ),
    (
        &[
            "authentication failed",
            "unauthorized",
            "403 forbidden",
            "invalid stream key",
        ],
        "Destination rejected the stream key or credentials",
    ),
    (
        &["real-time buffer"],
        "Capture buffer overflowed, the machine could not keep up",
    ),
    (
        &[
            "unknown format",
            "unable to find a suitable output format",
            "unsupported codec",
            "invalid data found",
        ],
        "Encoder profile or output format mismatch",
    ),
];

pub const FALLBACK: &str = "Streaming failed, inspect the encoder log for details";

/// Map one process lifetime's diagnostic text to a human-readable category.
pub fn classify(stderr: &str) -> &'static str {
    let haystack = stderr.to_ascii_lowercase();
    for (patterns, category) in RULES {
        if patterns.iter().any(|p| haystack.contains(p)) {
            return category;
        }
    }
    FALLBACK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_refused() {
        let c = classify("rtmp://a/x: Connection refused");
        assert_eq!(c, "The streaming server refused the connection");
    }

    #[test]
    fn test_unmatched_text_falls_back() {
        assert_eq!(classify("something inscrutable happened"), FALLBACK);
        assert_eq!(classify(""), FALLBACK);
    }

    #[test]
    fn test_rule_order_is_priority_order() {
        // Both a loss pattern and a refused pattern present: the earlier
        // (loss) row wins.
        let text = "Connection timed out\nConnection refused";
        assert_eq!(
            classify(text),
            "Network connection to the streaming server was lost"
        );
    }

    #[test]
    fn test_device_not_found() {
        let stderr = "[dshow @ 0x1] Could not find video device with name [Webcam] among source devices of type video.";
        assert_eq!(classify(stderr), "Capture device not found");
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert_eq!(
            classify("CONNECTION REFUSED"),
            "The streaming server refused the connection"
        );
    }

    #[test]
    fn test_buffer_overflow() {
        let stderr = "real-time buffer [cam] [video input] too full or near too full! frame dropped!";
        assert_eq!(
            classify(stderr),
            "Capture buffer overflowed, the machine could not keep up"
        );
    }
}
