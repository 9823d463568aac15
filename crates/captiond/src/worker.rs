use std::sync::Arc;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use crate::cancel::CancellationToken;
use crate::caption::format_timestamp;
use crate::job::{JobOutcome, JobReport};
use crate::pipeline::Pipeline;
use crate::scheduler::{CandidateSource, Scheduler};

/// Totals for one pass of the pool
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    pub withdrawn: usize,
    /// Audio seconds captioned by finished jobs
    pub audio_seconds: f64,
    /// Every report, in completion order
    pub reports: Vec<JobReport>,
}

impl RunSummary {
    pub fn record(&mut self, report: JobReport) {
        match &report.outcome {
            JobOutcome::Done { audio_seconds, .. } => {
                self.done += 1;
                self.audio_seconds += audio_seconds;
            }
            JobOutcome::Skipped { .. } => self.skipped += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
            JobOutcome::Withdrawn => self.withdrawn += 1,
        }
        self.reports.push(report);
    }

    pub fn jobs(&self) -> usize {
        self.reports.len()
    }

    pub fn log(&self) {
        info!(
            "Run summary: {} done, {} skipped, {} failed, {} not started; {} of audio captioned",
            self.done,
            self.skipped,
            self.failed,
            self.withdrawn,
            format_timestamp(self.audio_seconds)
        );
    }
}

/// N workers pulling one candidate at a time from a shared scheduler
pub struct WorkerPool {
    workers: usize,
    token: CancellationToken,
}

impl WorkerPool {
    pub fn new(workers: usize, token: CancellationToken) -> Self {
        Self {
            workers: workers.max(1),
            token,
        }
    }

    /// Run until the scheduler is exhausted or a stop is requested.
    /// In-flight jobs always finish before this returns.
    pub async fn run<S>(&self, scheduler: Arc<Scheduler<S>>, pipeline: Arc<Pipeline>) -> RunSummary
    where
        S: CandidateSource + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<JobReport>();
        let mut tasks = JoinSet::new();

        info!("Starting {} worker(s)", self.workers);
        for worker_id in 0..self.workers {
            let scheduler = Arc::clone(&scheduler);
            let pipeline = Arc::clone(&pipeline);
            let token = self.token.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                loop {
                    if token.stop_requested() {
                        info!("Worker {}: stop requested, exiting", worker_id);
                        break;
                    }

                    let Some(candidate) = scheduler.dequeue().await else {
                        debug!("Worker {}: no more candidates", worker_id);
                        break;
                    };

                    let report = pipeline.run(candidate).await;
                    if tx.send(report).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut summary = RunSummary::default();
        while let Some(report) = rx.recv().await {
            summary.record(report);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }

        summary.log();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use crate::config::CaptionConfig;
    use crate::keywords::{KeywordBoundary, KeywordMatcher};
    use crate::scan::{CandidateFile, CandidateScanner};
    use crate::testing::{BatchSource, FakeInspector, FakeMuxer, FakeRecognizer, MuxBehavior};

    fn write(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, vec![b'x'; len]).unwrap();
        path
    }

    fn pipeline(
        inspector: &FakeInspector,
        recognizer: &FakeRecognizer,
        muxer: MuxBehavior,
        config: CaptionConfig,
        token: &CancellationToken,
    ) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            Arc::new(inspector.clone()),
            Arc::new(recognizer.clone()),
            Arc::new(FakeMuxer::new(muxer)),
            config,
            token.clone(),
        ))
    }

    #[tokio::test]
    async fn test_smallest_first_with_scanner() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.mp4", 10_000);
        let b = write(dir.path(), "b.mp4", 500);
        let c = write(dir.path(), "c.mp4", 2_000);
        let inspector = FakeInspector::new().video(&a).captioned(&b).video(&c);
        let recognizer = FakeRecognizer::new();
        let token = CancellationToken::new();
        let config = CaptionConfig { workers: 1, ..Default::default() };

        let matcher = KeywordMatcher::new(["mp4"], KeywordBoundary::Either).unwrap();
        let scanner = CandidateScanner::new(
            vec![dir.path().to_path_buf()],
            matcher,
            Arc::new(inspector.clone()),
            config.clone(),
            token.clone(),
        );
        let scheduler = Arc::new(Scheduler::new(scanner, config.batch_size, token.clone()));
        let p = pipeline(&inspector, &recognizer, MuxBehavior::Append, config, &token);

        let summary = WorkerPool::new(1, token).run(scheduler, p).await;

        assert_eq!(recognizer.calls(), vec![c.clone(), a.clone()]);
        assert_eq!(summary.done, 2);
        assert_eq!(summary.jobs(), 2);
        assert_eq!(summary.audio_seconds, 1200.0);
        assert!(dir.path().join("a.mkv").exists());
        assert!(dir.path().join("c.mkv").exists());
        assert_eq!(fs::read(&b).unwrap().len(), 500);
        assert!(!dir.path().join("b.mkv").exists());
    }

    #[tokio::test]
    async fn test_never_more_than_n_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut inspector = FakeInspector::new();
        let mut batch = Vec::new();
        for i in 0..8 {
            let path = write(dir.path(), &format!("clip{}.mp3", i), 10 + i);
            inspector = inspector.audio(&path);
            batch.push(CandidateFile { path, size_bytes: 10 + i as u64, matched_keyword: None });
        }
        let recognizer = FakeRecognizer::new().with_delay(Duration::from_millis(20));
        let token = CancellationToken::new();
        let config = CaptionConfig { engine_concurrent: true, ..Default::default() };

        let scheduler = Arc::new(Scheduler::new(BatchSource::new(vec![batch]), 25, token.clone()));
        let p = pipeline(&inspector, &recognizer, MuxBehavior::Append, config, &token);
        let summary = WorkerPool::new(3, token).run(scheduler, p).await;

        assert_eq!(summary.done, 8);
        assert!(recognizer.peak_concurrency() <= 3);
        assert!(recognizer.peak_concurrency() >= 2);
    }

    #[tokio::test]
    async fn test_engine_serialised_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut inspector = FakeInspector::new();
        let mut batch = Vec::new();
        for i in 0..4 {
            let path = write(dir.path(), &format!("clip{}.mp3", i), 10);
            inspector = inspector.audio(&path);
            batch.push(CandidateFile { path, size_bytes: 10, matched_keyword: None });
        }
        let recognizer = FakeRecognizer::new().with_delay(Duration::from_millis(10));
        let token = CancellationToken::new();

        let scheduler = Arc::new(Scheduler::new(BatchSource::new(vec![batch]), 25, token.clone()));
        let p = pipeline(&inspector, &recognizer, MuxBehavior::Append, CaptionConfig::default(), &token);
        let summary = WorkerPool::new(4, token).run(scheduler, p).await;

        assert_eq!(summary.done, 4);
        assert_eq!(recognizer.peak_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_first_interrupt_finishes_current_job_only() {
        let dir = tempfile::tempdir().unwrap();
        let small = write(dir.path(), "small.mp3", 1);
        let large = write(dir.path(), "large.mp3", 100);
        let inspector = FakeInspector::new().audio(&small).audio(&large);
        let token = CancellationToken::new();
        let stopper = token.clone();
        let recognizer = FakeRecognizer::new().on_call(move |_| {
            stopper.interrupt();
        });

        let batch = vec![
            CandidateFile { path: large.clone(), size_bytes: 100, matched_keyword: None },
            CandidateFile { path: small.clone(), size_bytes: 1, matched_keyword: None },
        ];
        let scheduler = Arc::new(Scheduler::new(BatchSource::new(vec![batch]), 25, token.clone()));
        let p = pipeline(&inspector, &recognizer, MuxBehavior::Append, CaptionConfig::default(), &token);
        let summary = WorkerPool::new(1, token.clone()).run(Arc::clone(&scheduler), p).await;

        assert!(token.stop_requested());
        assert!(!token.abort_requested());
        assert_eq!(recognizer.calls(), vec![small]);
        assert_eq!(summary.done, 1);
        // the larger file is still queued, untouched
        assert_eq!(scheduler.queued().await, 1);
        assert_eq!(fs::read(&large).unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_failures_are_contained() {
        let dir = tempfile::tempdir().unwrap();
        let ok = write(dir.path(), "ok.mp4", 5);
        let broken = write(dir.path(), "broken.mp4", 1);
        let inspector = FakeInspector::new().video(&ok).failing(&broken);
        let recognizer = FakeRecognizer::new();
        let token = CancellationToken::new();

        let batch = vec![
            CandidateFile { path: ok.clone(), size_bytes: 5, matched_keyword: None },
            CandidateFile { path: broken.clone(), size_bytes: 1, matched_keyword: None },
        ];
        let scheduler = Arc::new(Scheduler::new(BatchSource::new(vec![batch]), 25, token.clone()));
        let p = pipeline(&inspector, &recognizer, MuxBehavior::Append, CaptionConfig::default(), &token);
        let summary = WorkerPool::new(2, token).run(scheduler, p).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.done, 1);
        assert!(broken.exists());
    }

    #[tokio::test]
    async fn test_rerun_on_captioned_output_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let talk = write(dir.path(), "talk.mkv", 5);
        let inspector = FakeInspector::new().captioned(&talk);
        let recognizer = FakeRecognizer::new();
        let token = CancellationToken::new();
        let before = fs::metadata(&talk).unwrap().modified().unwrap();

        let batch = vec![CandidateFile { path: talk.clone(), size_bytes: 5, matched_keyword: None }];
        let scheduler = Arc::new(Scheduler::new(BatchSource::new(vec![batch]), 25, token.clone()));
        let p = pipeline(&inspector, &recognizer, MuxBehavior::Append, CaptionConfig::default(), &token);
        let summary = WorkerPool::new(1, token).run(scheduler, p).await;

        assert_eq!(summary.skipped, 1);
        assert!(recognizer.calls().is_empty());
        assert_eq!(fs::metadata(&talk).unwrap().modified().unwrap(), before);
    }
}
