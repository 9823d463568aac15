//! In-memory stand-ins for the external tools.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use crate::caption::TranscriptSegment;
use crate::error::{PipelineError, PipelineResult};
use crate::ffmpeg::Muxer;
use crate::ffprobe::{StreamInspector, StreamInventory};
use crate::scan::CandidateFile;
use crate::scheduler::CandidateSource;
use crate::whisper::Recognizer;

pub fn candidate(path: &str, size_bytes: u64) -> CandidateFile {
    CandidateFile {
        path: PathBuf::from(path),
        size_bytes,
        matched_keyword: None,
    }
}

pub fn inventory(kinds: &[&str], duration: Option<f64>) -> StreamInventory {
    StreamInventory {
        has_audio: kinds.contains(&"audio"),
        has_subtitle: kinds.contains(&"subtitle"),
        codec_kinds: kinds.iter().map(|k| k.to_string()).collect(),
        duration_seconds: duration,
    }
}

/// Hands out canned batches, then reports exhaustion
pub struct BatchSource {
    batches: VecDeque<Vec<CandidateFile>>,
    requested: Vec<usize>,
}

impl BatchSource {
    pub fn new(batches: Vec<Vec<CandidateFile>>) -> Self {
        Self { batches: batches.into(), requested: Vec::new() }
    }

    pub fn requested_sizes(&self) -> &[usize] {
        &self.requested
    }
}

#[async_trait]
impl CandidateSource for BatchSource {
    async fn next_batch(&mut self, max: usize) -> Option<Vec<CandidateFile>> {
        self.requested.push(max);
        self.batches.pop_front()
    }
}

/// Inspector answering from a shared table; unknown paths fail to probe
#[derive(Clone, Default)]
pub struct FakeInspector {
    table: Arc<Mutex<HashMap<PathBuf, Option<StreamInventory>>>>,
    probes: Arc<Mutex<Vec<PathBuf>>>,
    delay: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: &Path, inv: Option<StreamInventory>) {
        self.table.lock().unwrap().insert(path.to_path_buf(), inv);
    }

    pub fn audio(self, path: &Path) -> Self {
        self.set(path, Some(inventory(&["audio"], Some(120.0))));
        self
    }

    pub fn video(self, path: &Path) -> Self {
        self.set(path, Some(inventory(&["video", "audio"], Some(600.0))));
        self
    }

    pub fn captioned(self, path: &Path) -> Self {
        self.set(path, Some(inventory(&["video", "audio", "subtitle"], Some(600.0))));
        self
    }

    pub fn video_only(self, path: &Path) -> Self {
        self.set(path, Some(inventory(&["video"], Some(10.0))));
        self
    }

    pub fn failing(self, path: &Path) -> Self {
        self.set(path, None);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn probe_log(&self) -> Arc<Mutex<Vec<PathBuf>>> {
        Arc::clone(&self.probes)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamInspector for FakeInspector {
    async fn inspect(&self, path: &Path) -> PipelineResult<StreamInventory> {
        self.probes.lock().unwrap().push(path.to_path_buf());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let entry = self.table.lock().unwrap().get(path).cloned();
        match entry {
            Some(Some(inv)) => Ok(inv),
            Some(None) => Err(PipelineError::probe(path, "malformed ffprobe output")),
            None => Err(PipelineError::probe(path, "unknown file")),
        }
    }
}

type Hook = Arc<dyn Fn(&Path) + Send + Sync>;

/// Recognizer returning fixed segments, tracking call order and concurrency
#[derive(Clone)]
pub struct FakeRecognizer {
    segments: Vec<TranscriptSegment>,
    delay: Duration,
    fail: bool,
    calls: Arc<Mutex<Vec<PathBuf>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    hook: Option<Hook>,
}

impl FakeRecognizer {
    pub fn new() -> Self {
        Self {
            segments: vec![
                TranscriptSegment { index: 1, start_seconds: 0.0, end_seconds: 1.5, text: " Hello.".into() },
                TranscriptSegment { index: 2, start_seconds: 1.5, end_seconds: 90.4, text: " Goodbye.".into() },
            ],
            delay: Duration::ZERO,
            fail: false,
            calls: Arc::default(),
            active: Arc::default(),
            peak: Arc::default(),
            hook: None,
        }
    }

    pub fn with_segments(mut self, segments: Vec<TranscriptSegment>) -> Self {
        self.segments = segments;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Run `hook` at the start of every transcription
    pub fn on_call(mut self, hook: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn transcribe(&self, media: &Path, work_dir: &Path) -> PipelineResult<Vec<TranscriptSegment>> {
        assert!(work_dir.is_dir(), "work dir must exist while transcribing");
        self.calls.lock().unwrap().push(media.to_path_buf());
        if let Some(hook) = &self.hook {
            (**hook)(media);
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(PipelineError::transcription(media, "engine crashed"));
        }
        Ok(self.segments.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MuxBehavior {
    /// Output = source bytes followed by the caption document
    Append,
    /// Non-zero exit after leaving a partial file behind
    Fail,
    /// Zero exit, zero-length output
    Empty,
}

/// Muxer that concatenates source and captions
#[derive(Clone)]
pub struct FakeMuxer {
    behavior: MuxBehavior,
    outputs: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeMuxer {
    pub fn new(behavior: MuxBehavior) -> Self {
        Self { behavior, outputs: Arc::default() }
    }

    pub fn outputs(&self) -> Vec<PathBuf> {
        self.outputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Muxer for FakeMuxer {
    async fn mux(&self, source: &Path, captions: &Path, output: &Path) -> PipelineResult<()> {
        self.outputs.lock().unwrap().push(output.to_path_buf());
        match self.behavior {
            MuxBehavior::Append => {
                let mut bytes = std::fs::read(source).map_err(|e| PipelineError::mux(source, e))?;
                bytes.extend(std::fs::read(captions).map_err(|e| PipelineError::mux(source, e))?);
                std::fs::write(output, bytes).map_err(|e| PipelineError::mux(source, e))?;
                Ok(())
            }
            MuxBehavior::Fail => {
                std::fs::write(output, b"partial").map_err(|e| PipelineError::mux(source, e))?;
                Err(PipelineError::mux(source, "ffmpeg exit code 1"))
            }
            MuxBehavior::Empty => {
                std::fs::write(output, b"").map_err(|e| PipelineError::mux(source, e))?;
                Ok(())
            }
        }
    }
}
