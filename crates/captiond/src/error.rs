use std::fmt::Display;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure kinds surfaced by the caption pipeline.
///
/// Everything except `Configuration` is contained to a single file or job:
/// the pool logs it and moves on to the next candidate.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A directory entry could not be read during scanning
    #[error("cannot read directory entry: {0}")]
    Discovery(String),

    /// The stream inspector failed to run or returned unparseable output
    #[error("probe failed for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    /// The recognition engine failed or produced no segments
    #[error("transcription failed for {path}: {message}")]
    Transcription { path: PathBuf, message: String },

    /// The muxer exited non-zero or produced no output
    #[error("mux failed for {path}: {message}")]
    Mux { path: PathBuf, message: String },

    /// Moving the muxed file into place (or copying its metadata) failed
    #[error("swap failed for {path}: {message}")]
    Swap { path: PathBuf, message: String },

    /// Fatal: the run cannot start
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn probe(path: &Path, err: impl Display) -> Self {
        Self::Probe { path: path.to_path_buf(), message: format!("{:#}", err) }
    }

    pub fn transcription(path: &Path, err: impl Display) -> Self {
        Self::Transcription { path: path.to_path_buf(), message: format!("{:#}", err) }
    }

    pub fn mux(path: &Path, err: impl Display) -> Self {
        Self::Mux { path: path.to_path_buf(), message: format!("{:#}", err) }
    }

    pub fn swap(path: &Path, err: impl Display) -> Self {
        Self::Swap { path: path.to_path_buf(), message: format!("{:#}", err) }
    }

    /// Short label used in job reports and the run summary
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery",
            Self::Probe { .. } => "probe",
            Self::Transcription { .. } => "transcription",
            Self::Mux { .. } => "mux",
            Self::Swap { .. } => "swap",
            Self::Configuration(_) => "configuration",
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_constructor_keeps_context_chain() {
        let err = anyhow!("exit status 1").context("ffmpeg failed");
        let mux = PipelineError::mux(Path::new("/media/a.mp4"), err);
        let text = mux.to_string();
        assert!(text.contains("/media/a.mp4"));
        assert!(text.contains("ffmpeg failed"));
        assert!(text.contains("exit status 1"));
        assert_eq!(mux.kind(), "mux");
    }
}
