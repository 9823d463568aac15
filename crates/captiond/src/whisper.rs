use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use crate::caption::TranscriptSegment;
use crate::error::{PipelineError, PipelineResult};
use crate::process;

/// Speech-to-text engine: whole file in, ordered timed segments out
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Transcribe `media`. Scratch output may be written under `work_dir`,
    /// which belongs to the calling job and is removed with it.
    async fn transcribe(&self, media: &Path, work_dir: &Path) -> PipelineResult<Vec<TranscriptSegment>>;
}

/// Recognizer backed by the `whisper` command line tool
#[derive(Debug, Clone)]
pub struct WhisperCli {
    pub whisper_bin: PathBuf,
    pub model: String,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

impl WhisperCli {
    pub fn new(whisper_bin: impl Into<PathBuf>, model: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            whisper_bin: whisper_bin.into(),
            model: model.into(),
            extra_args,
        }
    }

    async fn run(&self, media: &Path, work_dir: &Path) -> Result<Vec<TranscriptSegment>> {
        let stem = media
            .file_stem()
            .and_then(|s| s.to_str())
            .context("Media file has no usable file stem")?;

        let mut cmd = process::tool_command(&self.whisper_bin);
        cmd.arg(media)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_format")
            .arg("json")
            .arg("--output_dir")
            .arg(work_dir)
            .arg("--verbose")
            .arg("False")
            .args(&self.extra_args);

        debug!("whisper: transcribing {} with model {}", media.display(), self.model);

        let output = process::run_tracked(cmd)
            .await
            .with_context(|| format!("Failed to execute {}", self.whisper_bin.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "whisper exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let json_path = work_dir.join(format!("{}.json", stem));
        let content = tokio::fs::read_to_string(&json_path)
            .await
            .with_context(|| format!("Failed to read whisper output: {}", json_path.display()))?;

        parse_whisper_json(&content)
    }
}

#[async_trait]
impl Recognizer for WhisperCli {
    async fn transcribe(&self, media: &Path, work_dir: &Path) -> PipelineResult<Vec<TranscriptSegment>> {
        let segments = self.run(media, work_dir)
            .await
            .map_err(|e| PipelineError::transcription(media, e))?;

        if segments.is_empty() {
            return Err(PipelineError::transcription(media, "engine returned no segments"));
        }
        Ok(segments)
    }
}

/// Parse whisper's JSON document into 1-based segments
pub fn parse_whisper_json(content: &str) -> Result<Vec<TranscriptSegment>> {
    let parsed: WhisperOutput = serde_json::from_str(content).context("Malformed whisper JSON")?;

    Ok(parsed.segments
        .into_iter()
        .enumerate()
        .map(|(i, s)| TranscriptSegment {
            index: i as u32 + 1,
            start_seconds: s.start,
            end_seconds: s.end.max(s.start),
            text: s.text,
        })
        .collect())
}
