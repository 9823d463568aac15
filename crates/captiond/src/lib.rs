pub mod caption;
pub mod cancel;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod ffprobe;
pub mod job;
pub mod keywords;
pub mod pipeline;
pub mod process;
pub mod replace;
pub mod scan;
pub mod scheduler;
pub mod sidecar;
pub mod whisper;
pub mod worker;

#[cfg(test)]
mod testing;

pub use cancel::{CancellationToken, ShutdownStage};
pub use caption::{CaptionFormat, TranscriptSegment};
pub use config::CaptionConfig;
pub use error::{PipelineError, PipelineResult};
pub use ffprobe::{StreamInspector, StreamInventory};
pub use job::{Job, JobOutcome, JobReport, JobState};
pub use keywords::{KeywordBoundary, KeywordMatcher};
pub use pipeline::Pipeline;
pub use scan::{CandidateFile, CandidateScanner};
pub use scheduler::{CandidateSource, Scheduler};
pub use worker::{RunSummary, WorkerPool};
