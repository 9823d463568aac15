use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::caption::CaptionFormat;
use crate::error::PipelineError;
use crate::keywords::KeywordBoundary;

/// Configuration for the caption daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    /// Directories scanned recursively when no paths are given on the command line
    pub library_roots: Vec<PathBuf>,
    /// Keyword list, one keyword per line, `#` comments allowed
    pub keywords_file: PathBuf,
    /// Which side(s) of a keyword must sit on a word boundary
    pub keyword_boundary: KeywordBoundary,
    /// Match keywords against the whole path instead of just the file name
    pub match_full_path: bool,
    /// Number of jobs allowed to run concurrently
    pub workers: usize,
    /// Number of concurrent ffprobe invocations during discovery
    pub probe_workers: usize,
    /// Maximum number of eligible candidates pulled per scheduler refill
    pub batch_size: usize,
    /// Keep the source file after a successful swap to a different path
    pub preserve_original: bool,
    /// Caption document flavour handed to the muxer
    pub caption_format: CaptionFormat,
    /// Language tag written on the new caption stream (e.g. "eng")
    pub caption_language: Option<String>,
    /// Extension used when the source only carries audio (and subtitle) streams
    pub audio_container: String,
    /// Extension used for everything else
    pub video_container: String,
    /// Extensions never considered as sources (caption files, archives)
    pub skip_extensions: Vec<String>,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the whisper CLI
    pub whisper_bin: PathBuf,
    /// Whisper model name
    pub whisper_model: String,
    /// Extra arguments appended to every whisper invocation
    pub whisper_args: Vec<String>,
    /// Whether the recognition engine tolerates concurrent inference
    pub engine_concurrent: bool,
    /// Also write the caption document next to the finished file
    pub export_sidecar: bool,
    /// Parent directory for per-job staging; defaults to the source's directory
    pub staging_dir: Option<PathBuf>,
    /// Interval in seconds between scans in watch mode
    pub scan_interval_secs: u64,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl CaptionConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            library_roots: Vec::new(),
            keywords_file: PathBuf::from("keywords.txt"),
            keyword_boundary: KeywordBoundary::Either,
            match_full_path: false,
            workers: 2,
            probe_workers: 10,
            batch_size: 25,
            preserve_original: false,
            caption_format: CaptionFormat::Srt,
            caption_language: None,
            audio_container: "mka".to_string(),
            video_container: "mkv".to_string(),
            skip_extensions: ["srt", "vtt", "ass", "ssa", "sub", "xz", "gz", "bz2", "zst", "zip", "7z", "rar", "tar", "nocaption"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ffprobe_bin: PathBuf::from("ffprobe"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            whisper_bin: PathBuf::from("whisper"),
            whisper_model: "turbo".to_string(),
            whisper_args: Vec::new(),
            engine_concurrent: false,
            export_sidecar: false,
            staging_dir: None,
            scan_interval_secs: 300,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.workers == 0 {
            return Err(PipelineError::Configuration("workers must be at least 1".into()));
        }
        if self.probe_workers == 0 {
            return Err(PipelineError::Configuration("probe_workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::Configuration("batch_size must be at least 1".into()));
        }
        if self.audio_container.trim().is_empty() || self.video_container.trim().is_empty() {
            return Err(PipelineError::Configuration("container extensions must not be empty".into()));
        }
        Ok(())
    }

    /// Whether a path's extension marks it as a non-source file
    pub fn is_skipped_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| self.skip_extensions.iter().any(|s| s.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = CaptionConfig::load_config(Some(Path::new("/nonexistent/captiond.toml"))).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.probe_workers, 10);
        assert_eq!(config.caption_format, CaptionFormat::Srt);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captiond.toml");
        fs::write(&path, "workers = 4\ncaption_format = \"webvtt\"\nkeyword_boundary = \"both\"\n").unwrap();

        let config = CaptionConfig::load_config(Some(&path)).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.caption_format, CaptionFormat::WebVtt);
        assert_eq!(config.keyword_boundary, KeywordBoundary::Both);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.video_container, "mkv");
    }

    #[test]
    fn test_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captiond.json");
        fs::write(&path, r#"{"preserve_original": true, "library_roots": ["/media"]}"#).unwrap();

        let config = CaptionConfig::load_config(Some(&path)).unwrap();
        assert!(config.preserve_original);
        assert_eq!(config.library_roots, vec![PathBuf::from("/media")]);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = CaptionConfig { workers: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(PipelineError::Configuration(_))));
        assert!(CaptionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_skipped_extensions_are_case_insensitive() {
        let config = CaptionConfig::default();
        assert!(config.is_skipped_extension(Path::new("/m/talk.SRT")));
        assert!(config.is_skipped_extension(Path::new("/m/backup.tar.xz")));
        assert!(!config.is_skipped_extension(Path::new("/m/talk.mp4")));
        assert!(!config.is_skipped_extension(Path::new("/m/README")));
    }
}
