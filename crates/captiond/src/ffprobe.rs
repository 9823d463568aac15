use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use crate::error::{PipelineError, PipelineResult};
use crate::process;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: Option<FFProbeFormat>,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    /// Seconds, as a decimal string
    pub duration: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub tags: Option<HashMap<String, String>>,
    pub disposition: Option<HashMap<String, i32>>,
}

/// What a media file carries, as far as captioning cares.
///
/// Never cached: the file may change between discovery and execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamInventory {
    pub has_audio: bool,
    pub has_subtitle: bool,
    /// Distinct stream kinds ("audio", "video", "subtitle", "data", ...)
    pub codec_kinds: BTreeSet<String>,
    /// Container duration in seconds, when reported
    pub duration_seconds: Option<f64>,
}

impl StreamInventory {
    /// True when the file holds nothing but audio and subtitle streams
    pub fn is_audio_only(&self) -> bool {
        self.has_audio && self.codec_kinds.iter().all(|k| k == "audio" || k == "subtitle")
    }

    /// Eligible for captioning: has audio, no captions yet
    pub fn needs_captions(&self) -> bool {
        self.has_audio && !self.has_subtitle
    }
}

impl From<&FFProbeData> for StreamInventory {
    fn from(data: &FFProbeData) -> Self {
        let codec_kinds: BTreeSet<String> = data.streams
            .iter()
            .filter_map(|s| s.codec_type.as_deref())
            .map(|k| k.to_lowercase())
            .collect();

        let duration_seconds = data.format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0);

        Self {
            has_audio: codec_kinds.contains("audio"),
            has_subtitle: codec_kinds.contains("subtitle"),
            codec_kinds,
            duration_seconds,
        }
    }
}

/// Reports per-file stream inventory. Stateless; a pure function of the path.
#[async_trait]
pub trait StreamInspector: Send + Sync {
    async fn inspect(&self, path: &Path) -> PipelineResult<StreamInventory>;
}

/// Inspector backed by a local ffprobe binary
#[derive(Debug, Clone)]
pub struct FFProbeInspector {
    pub ffprobe_bin: PathBuf,
}

impl FFProbeInspector {
    pub fn new(ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self { ffprobe_bin: ffprobe_bin.into() }
    }
}

#[async_trait]
impl StreamInspector for FFProbeInspector {
    async fn inspect(&self, path: &Path) -> PipelineResult<StreamInventory> {
        let data = probe_file(&self.ffprobe_bin, path)
            .await
            .map_err(|e| PipelineError::probe(path, e))?;
        Ok(StreamInventory::from(&data))
    }
}

/// Run ffprobe and parse the JSON output
pub async fn probe_file(ffprobe_bin: &Path, file_path: &Path) -> Result<FFProbeData> {
    // Verify file exists before trying to probe
    if !file_path.exists() {
        anyhow::bail!("File does not exist: {}", file_path.display());
    }

    debug!("ffprobe: probing {}", file_path.display());

    let mut cmd = process::tool_command(ffprobe_bin);
    cmd.arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(file_path);
    let output = process::run_tracked(cmd)
        .await
        .with_context(|| format!("Failed to execute {} for: {}", ffprobe_bin.display(), file_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        anyhow::bail!(
            "ffprobe failed (exit code {}) for {}: {}",
            exit_code,
            file_path.display(),
            stderr.trim()
        );
    }

    parse_probe_output(&output.stdout)
        .with_context(|| format!("Failed to parse ffprobe JSON for: {}", file_path.display()))
}

/// Parse raw ffprobe JSON
pub fn parse_probe_output(stdout: &[u8]) -> Result<FFProbeData> {
    let json_str = std::str::from_utf8(stdout).context("ffprobe output is not valid UTF-8")?;
    let data: FFProbeData = serde_json::from_str(json_str)?;
    Ok(data)
}
