use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use crate::caption::CaptionFormat;
use crate::error::{PipelineError, PipelineResult};
use crate::process;

/// Merges a caption document into a copy of a media container
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Write `output` holding every stream of `source` plus `captions` as a new
    /// subtitle stream, without re-encoding.
    async fn mux(&self, source: &Path, captions: &Path, output: &Path) -> PipelineResult<()>;
}

/// Result of running an ffmpeg command
#[derive(Debug)]
pub struct FFmpegResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Muxer backed by a local ffmpeg binary
#[derive(Debug, Clone)]
pub struct FFmpegMuxer {
    pub ffmpeg_bin: PathBuf,
    pub caption_format: CaptionFormat,
    pub language: Option<String>,
}

impl FFmpegMuxer {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, caption_format: CaptionFormat, language: Option<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            caption_format,
            language,
        }
    }

    /// Build the ffmpeg argument list for one merge
    pub fn build_args(&self, source: &Path, captions: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        args.push("-nostdin".to_string());
        args.push("-v".to_string());
        args.push("error".to_string());
        args.push("-y".to_string());

        args.push("-i".to_string());
        args.push(source.display().to_string());
        args.push("-i".to_string());
        args.push(captions.display().to_string());

        // Every source stream except data tracks (tmcd, mebx, ...), which
        // Matroska cannot hold, plus the caption track
        args.push("-map".to_string());
        args.push("0".to_string());
        args.push("-map".to_string());
        args.push("-0:d".to_string());
        args.push("-map".to_string());
        args.push("1:0".to_string());
        args.push("-map_metadata".to_string());
        args.push("0".to_string());

        args.push("-c".to_string());
        args.push("copy".to_string());
        args.push("-c:s".to_string());
        args.push(subtitle_codec_for(output, self.caption_format).to_string());

        if let Some(lang) = &self.language {
            args.push("-metadata:s:s:0".to_string());
            args.push(format!("language={}", lang));
        }

        args.push(output.display().to_string());
        args
    }

    async fn run(&self, source: &Path, captions: &Path, output: &Path) -> Result<FFmpegResult> {
        let args = self.build_args(source, captions, output);
        debug!("ffmpeg command: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        let mut cmd = process::tool_command(&self.ffmpeg_bin);
        cmd.args(&args);
        let out = process::run_tracked(cmd)
            .await
            .with_context(|| format!("Failed to execute {}", self.ffmpeg_bin.display()))?;

        Ok(FFmpegResult {
            exit_code: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
        })
    }
}

#[async_trait]
impl Muxer for FFmpegMuxer {
    async fn mux(&self, source: &Path, captions: &Path, output: &Path) -> PipelineResult<()> {
        let result = self.run(source, captions, output)
            .await
            .map_err(|e| PipelineError::mux(source, e))?;

        if result.exit_code != 0 {
            return Err(PipelineError::mux(
                source,
                format!("ffmpeg exit code {}: {}", result.exit_code, result.stderr.trim()),
            ));
        }
        Ok(())
    }
}

/// Subtitle codec the output container can hold
pub fn subtitle_codec_for(output: &Path, format: CaptionFormat) -> &'static str {
    let ext = output
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4a" | "m4v" | "m4b" | "mov" | "3gp" => "mov_text",
        "webm" => "webvtt",
        _ => match format {
            CaptionFormat::Srt => "srt",
            CaptionFormat::WebVtt => "webvtt",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtitle_codec_by_container() {
        assert_eq!(subtitle_codec_for(Path::new("a.m4a"), CaptionFormat::Srt), "mov_text");
        assert_eq!(subtitle_codec_for(Path::new("a.MP4"), CaptionFormat::WebVtt), "mov_text");
        assert_eq!(subtitle_codec_for(Path::new("a.webm"), CaptionFormat::Srt), "webvtt");
        assert_eq!(subtitle_codec_for(Path::new("a.mkv"), CaptionFormat::Srt), "srt");
        assert_eq!(subtitle_codec_for(Path::new("a.mkv"), CaptionFormat::WebVtt), "webvtt");
    }

    #[test]
    fn test_build_args_copies_all_streams() {
        let muxer = FFmpegMuxer::new("ffmpeg", CaptionFormat::Srt, Some("eng".to_string()));
        let args = muxer.build_args(
            Path::new("/media/talk.mp4"),
            Path::new("/media/.stage/talk.srt"),
            Path::new("/media/.stage/talk.mkv"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-i /media/talk.mp4 -i /media/.stage/talk.srt"));
        assert!(joined.contains("-map 0 -map -0:d -map 1:0"));
        assert!(joined.contains("-c copy -c:s srt"));
        assert!(joined.contains("-metadata:s:s:0 language=eng"));
        assert_eq!(args.last().map(String::as_str), Some("/media/.stage/talk.mkv"));
    }

    #[test]
    fn test_audio_default_container_takes_any_codec() {
        let muxer = FFmpegMuxer::new("ffmpeg", CaptionFormat::Srt, None);
        let args = muxer.build_args(
            Path::new("/media/podcast.mp3"),
            Path::new("/media/.stage/captions.srt"),
            Path::new("/media/.stage/podcast.mka"),
        );
        let joined = args.join(" ");
        // stream copy into Matroska audio, subtitles as plain srt
        assert!(joined.contains("-c copy -c:s srt"));
        assert!(!joined.contains("mov_text"));
        assert!(joined.contains("-map -0:d"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_mux_error() {
        let dir = tempfile::tempdir().unwrap();
        let muxer = FFmpegMuxer::new(dir.path().join("no-such-ffmpeg"), CaptionFormat::Srt, None);
        let err = muxer
            .mux(Path::new("/m/a.mp4"), Path::new("/m/a.srt"), &dir.path().join("a.mkv"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Mux { .. }));
    }
}
