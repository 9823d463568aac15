use std::fmt::Write as _;
use serde::{Deserialize, Serialize};

/// One timed segment produced by the recognition engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// 1-based, contiguous
    pub index: u32,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

/// Caption document flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionFormat {
    Srt,
    #[serde(alias = "vtt")]
    WebVtt,
}

impl CaptionFormat {
    /// File extension of the rendered document
    pub fn extension(&self) -> &'static str {
        match self {
            CaptionFormat::Srt => "srt",
            CaptionFormat::WebVtt => "vtt",
        }
    }
}

/// Format seconds as `HH:MM:SS.mmm`.
///
/// The value is first resolved to whole microseconds, then truncated to
/// milliseconds, so 3661.999 renders as `01:01:01.999` rather than losing a
/// millisecond to binary float error. Negative and non-finite input clamps to zero.
pub fn format_timestamp(seconds: f64) -> String {
    let micros = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1_000_000.0).round() as u64
    } else {
        0
    };
    let millis_total = micros / 1_000;
    let millis = millis_total % 1_000;
    let secs_total = millis_total / 1_000;
    let hours = secs_total / 3_600;
    let minutes = (secs_total % 3_600) / 60;
    let secs = secs_total % 60;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}

/// Render segments into a caption document.
///
/// Cues are renumbered 1..=n in input order, text is trimmed, and a segment
/// whose end precedes its start is clamped to a zero-length cue.
pub fn render(segments: &[TranscriptSegment], format: CaptionFormat) -> String {
    let mut doc = String::new();
    if format == CaptionFormat::WebVtt {
        doc.push_str("WEBVTT\n\n");
    }

    for (i, segment) in segments.iter().enumerate() {
        let end = segment.end_seconds.max(segment.start_seconds);
        // Writing to a String cannot fail
        let _ = write!(
            doc,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_timestamp(segment.start_seconds),
            format_timestamp(end),
            segment.text.trim()
        );
    }

    doc
}
