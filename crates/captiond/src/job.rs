use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use uuid::Uuid;
use crate::scan::CandidateFile;

/// Lifecycle of one captioning job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobState {
    Discovered,
    Eligible,
    Transcribing,
    Muxing,
    Swapping,
    Done,
    Skipped,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Skipped | JobState::Failed)
    }

    /// Whether this state occupies one of the pool's execution slots
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Transcribing | JobState::Muxing | JobState::Swapping)
    }

    fn can_advance_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Discovered, Eligible) | (Discovered, Skipped) | (Discovered, Failed) => true,
            (Eligible, Transcribing) | (Eligible, Skipped) | (Eligible, Failed) => true,
            (Transcribing, Muxing) | (Transcribing, Failed) => true,
            (Muxing, Swapping) | (Muxing, Failed) => true,
            (Swapping, Done) | (Swapping, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A candidate being worked on. Owned by exactly one worker.
#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub candidate: CandidateFile,
    state: JobState,
    pub started_at: DateTime<Utc>,
}

impl Job {
    pub fn new(candidate: CandidateFile) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            candidate,
            state: JobState::Discovered,
            started_at: Utc::now(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`, refusing anything but a forward transition.
    /// Returns false (and leaves the state alone) for an illegal one.
    pub fn advance(&mut self, next: JobState) -> bool {
        if self.state.can_advance_to(next) {
            debug!("Job {}: {} -> {}", self.id, self.state, next);
            self.state = next;
            true
        } else {
            warn!("Job {}: refused transition {} -> {}", self.id, self.state, next);
            false
        }
    }
}

/// Terminal result of running the pipeline on one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done {
        destination: PathBuf,
        audio_seconds: f64,
        elapsed: Duration,
        original_removed: bool,
    },
    Skipped {
        reason: String,
    },
    Failed {
        kind: &'static str,
        error: String,
    },
    /// Dequeued after a stop request; never left `Eligible`
    Withdrawn,
}

impl JobOutcome {
    /// Processing speed as audio seconds per wall-clock second
    pub fn speed_ratio(&self) -> Option<f64> {
        match self {
            JobOutcome::Done { audio_seconds, elapsed, .. } => {
                let wall = elapsed.as_secs_f64();
                (wall > 0.0).then(|| audio_seconds / wall)
            }
            _ => None,
        }
    }
}

/// What a worker reports once a job stops
#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Last lifecycle state the job reached
    pub state: JobState,
    pub outcome: JobOutcome,
    pub finished_at: DateTime<Utc>,
}
