use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use chrono::Utc;
use humansize::{format_size, DECIMAL};
use log::{error, info, warn};
use tokio::sync::Semaphore;
use crate::cancel::CancellationToken;
use crate::caption::{self, format_timestamp};
use crate::config::CaptionConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::ffmpeg::{FFmpegMuxer, Muxer};
use crate::ffprobe::{FFProbeInspector, StreamInspector, StreamInventory};
use crate::job::{Job, JobOutcome, JobReport, JobState};
use crate::replace::{self, Staging};
use crate::scan::CandidateFile;
use crate::sidecar;
use crate::whisper::{Recognizer, WhisperCli};

/// Per-candidate work: re-probe, transcribe, mux, swap.
///
/// Shared by all workers; holds no per-job state. The recognition engine is
/// serialised behind a one-permit semaphore unless configured as concurrent.
pub struct Pipeline {
    inspector: Arc<dyn StreamInspector>,
    recognizer: Arc<dyn Recognizer>,
    muxer: Arc<dyn Muxer>,
    engine_gate: Option<Semaphore>,
    config: CaptionConfig,
    token: CancellationToken,
}

impl Pipeline {
    pub fn new(
        inspector: Arc<dyn StreamInspector>,
        recognizer: Arc<dyn Recognizer>,
        muxer: Arc<dyn Muxer>,
        config: CaptionConfig,
        token: CancellationToken,
    ) -> Self {
        let engine_gate = (!config.engine_concurrent).then(|| Semaphore::new(1));
        Self {
            inspector,
            recognizer,
            muxer,
            engine_gate,
            config,
            token,
        }
    }

    /// Pipeline wired to ffprobe, whisper and ffmpeg as configured
    pub fn from_config(config: CaptionConfig, token: CancellationToken) -> Self {
        let inspector = Arc::new(FFProbeInspector::new(config.ffprobe_bin.clone()));
        let recognizer = Arc::new(WhisperCli::new(
            config.whisper_bin.clone(),
            config.whisper_model.clone(),
            config.whisper_args.clone(),
        ));
        let muxer = Arc::new(FFmpegMuxer::new(
            config.ffmpeg_bin.clone(),
            config.caption_format,
            config.caption_language.clone(),
        ));
        Self::new(inspector, recognizer, muxer, config, token)
    }

    pub fn inspector(&self) -> Arc<dyn StreamInspector> {
        Arc::clone(&self.inspector)
    }

    /// Where the captioned file ends up: same stem, extension picked by stream set
    pub fn destination_for(&self, source: &Path, inventory: &StreamInventory) -> PathBuf {
        let ext = if inventory.is_audio_only() {
            &self.config.audio_container
        } else {
            &self.config.video_container
        };
        // keep the source's spelling: Talk.MKV stays Talk.MKV
        let same_container = source
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext));
        if same_container {
            source.to_path_buf()
        } else {
            source.with_extension(ext)
        }
    }

    /// Run one candidate to a terminal outcome. Never panics on job errors;
    /// every failure is contained in the returned report.
    pub async fn run(&self, candidate: CandidateFile) -> JobReport {
        let mut job = Job::new(candidate);
        info!(
            "Job {}: starting {} ({})",
            job.id,
            job.candidate.path.display(),
            format_size(job.candidate.size_bytes, DECIMAL)
        );

        let outcome = match self.execute(&mut job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                job.advance(JobState::Failed);
                JobOutcome::Failed { kind: e.kind(), error: e.to_string() }
            }
        };

        match &outcome {
            JobOutcome::Done { destination, audio_seconds, elapsed, .. } => {
                info!(
                    "Job {}: ✅ Done {} (audio {}, took {}, {:.2}x speed)",
                    job.id,
                    destination.display(),
                    format_timestamp(*audio_seconds),
                    format_timestamp(elapsed.as_secs_f64()),
                    outcome.speed_ratio().unwrap_or(0.0)
                );
            }
            JobOutcome::Skipped { reason } => info!("Job {}: Skipped - {}", job.id, reason),
            JobOutcome::Failed { error, .. } => error!("Job {}: ❌ Failed - {}", job.id, error),
            JobOutcome::Withdrawn => info!("Job {}: not started, shutdown requested", job.id),
        }

        let state = job.state();
        JobReport {
            id: job.id,
            path: job.candidate.path,
            size_bytes: job.candidate.size_bytes,
            state,
            outcome,
            finished_at: Utc::now(),
        }
    }

    async fn execute(&self, job: &mut Job) -> PipelineResult<JobOutcome> {
        let source = job.candidate.path.clone();

        // The queue may be old: look again before spending engine time
        let inventory = self.inspector.inspect(&source).await?;
        if inventory.has_subtitle {
            job.advance(JobState::Skipped);
            return Ok(JobOutcome::Skipped { reason: "caption stream already present".into() });
        }
        if !inventory.has_audio {
            job.advance(JobState::Skipped);
            return Ok(JobOutcome::Skipped { reason: "no audio stream".into() });
        }
        job.advance(JobState::Eligible);

        if self.token.stop_requested() {
            return Ok(JobOutcome::Withdrawn);
        }

        let staging = Staging::create(&source, self.config.staging_dir.as_deref())?;
        let started = Instant::now();

        job.advance(JobState::Transcribing);
        info!("Job {}: transcribing", job.id);
        let segments = {
            let _permit = match &self.engine_gate {
                Some(gate) => Some(
                    gate.acquire()
                        .await
                        .map_err(|e| PipelineError::transcription(&source, e))?,
                ),
                None => None,
            };
            self.recognizer.transcribe(&source, staging.path()).await?
        };
        if segments.is_empty() {
            return Err(PipelineError::transcription(&source, "engine returned no segments"));
        }

        let format = self.config.caption_format;
        let document = caption::render(&segments, format);
        let captions_path = staging.file(format!("captions.{}", format.extension()));
        tokio::fs::write(&captions_path, &document)
            .await
            .map_err(|e| PipelineError::mux(&source, format!("cannot write caption document: {}", e)))?;

        job.advance(JobState::Muxing);
        let destination = self.destination_for(&source, &inventory);
        let file_name = destination
            .file_name()
            .ok_or_else(|| PipelineError::mux(&source, "destination has no file name"))?;
        let staged = staging.file(file_name);
        info!("Job {}: muxing {} cue(s) into {}", job.id, segments.len(), destination.display());

        self.muxer.mux(&source, &captions_path, &staged).await?;
        let staged_len = tokio::fs::metadata(&staged).await.map(|m| m.len()).unwrap_or(0);
        if staged_len == 0 {
            return Err(PipelineError::mux(&source, "muxer produced no output"));
        }

        job.advance(JobState::Swapping);
        let swap = replace::replace(&source, &staged, &destination, self.config.preserve_original)?;
        job.advance(JobState::Done);
        let elapsed = started.elapsed();

        if self.config.export_sidecar {
            match sidecar::write_caption_sidecar(&swap.destination, format, &document) {
                Ok(path) => info!("Job {}: wrote caption sidecar {}", job.id, path.display()),
                Err(e) => warn!("Job {}: {:#}", job.id, e),
            }
        }

        let audio_seconds = inventory
            .duration_seconds
            .or_else(|| segments.last().map(|s| s.end_seconds))
            .unwrap_or(0.0);

        Ok(JobOutcome::Done {
            destination: swap.destination,
            audio_seconds,
            elapsed,
            original_removed: swap.original_removed,
        })
    }
}
