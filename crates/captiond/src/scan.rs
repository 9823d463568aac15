use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use async_trait::async_trait;
use humansize::{format_size, DECIMAL};
use log::{debug, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;
use crate::cancel::CancellationToken;
use crate::config::CaptionConfig;
use crate::error::PipelineError;
use crate::ffprobe::StreamInspector;
use crate::keywords::KeywordMatcher;
use crate::replace::is_staging_dir;
use crate::scheduler::CandidateSource;
use crate::sidecar;

/// A file that passed every scan filter
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub matched_keyword: Option<String>,
}

/// Running totals for one pass over the inputs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanStats {
    pub entries: u64,
    pub keyword_matches: u64,
    pub probed: u64,
    pub eligible: u64,
    pub probe_failures: u64,
}

type Discovery = Box<dyn Iterator<Item = Result<PathBuf, PipelineError>> + Send>;

/// Lazily walks the inputs and yields eligible candidates in batches.
///
/// Cheap filters (extension, skip marker, keyword) run inline while walking;
/// the stream probe runs on a bounded pool of concurrent inspector calls.
pub struct CandidateScanner {
    inputs: Vec<PathBuf>,
    matcher: KeywordMatcher,
    inspector: Arc<dyn StreamInspector>,
    config: CaptionConfig,
    token: CancellationToken,
    walker: Discovery,
    exhausted: bool,
    stats: ScanStats,
}

impl CandidateScanner {
    /// `inputs` may mix directories (walked recursively) and individual files
    pub fn new(
        inputs: Vec<PathBuf>,
        matcher: KeywordMatcher,
        inspector: Arc<dyn StreamInspector>,
        config: CaptionConfig,
        token: CancellationToken,
    ) -> Self {
        let walker = discover(inputs.clone());
        Self {
            inputs,
            matcher,
            inspector,
            config,
            token,
            walker,
            exhausted: false,
            stats: ScanStats::default(),
        }
    }

    /// Start over from the first input
    pub fn restart(&mut self) {
        info!("Restarting scan of {} input(s)", self.inputs.len());
        self.walker = discover(self.inputs.clone());
        self.exhausted = false;
        self.stats = ScanStats::default();
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Apply the cheap filters: extension, opt-out marker, keyword
    fn prefilter(&mut self, path: PathBuf) -> Option<CandidateFile> {
        if self.config.is_skipped_extension(&path) {
            debug!("Skipping non-source file: {}", path.display());
            return None;
        }

        if sidecar::has_skip_marker(&path) {
            debug!("Skipping {}: skip marker exists", path.display());
            return None;
        }

        let matched = {
            let haystack = if self.config.match_full_path {
                path.to_string_lossy()
            } else {
                match path.file_name() {
                    Some(name) => name.to_string_lossy(),
                    None => return None,
                }
            };
            self.matcher.find(&haystack)?
        };
        self.stats.keyword_matches += 1;

        let size_bytes = match fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) => {
                warn!("Failed to stat {}: {}", path.display(), e);
                return None;
            }
        };

        debug!("Keyword '{}' matched: {}", matched, path.display());
        Some(CandidateFile {
            path,
            size_bytes,
            matched_keyword: Some(matched),
        })
    }

    /// Probe a group of pre-filtered files concurrently; keep discovery order
    async fn probe_all(&mut self, pending: Vec<CandidateFile>) -> Vec<CandidateFile> {
        let permits = Arc::new(Semaphore::new(self.config.probe_workers.max(1)));
        let mut tasks = JoinSet::new();
        let count = pending.len();

        for (idx, candidate) in pending.into_iter().enumerate() {
            let permits = Arc::clone(&permits);
            let inspector = Arc::clone(&self.inspector);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = inspector.inspect(&candidate.path).await;
                (idx, candidate, result)
            });
        }

        let mut slots: Vec<Option<CandidateFile>> = vec![None; count];
        while let Some(joined) = tasks.join_next().await {
            let (idx, candidate, result) = match joined {
                Ok(r) => r,
                Err(e) => {
                    warn!("Probe task panicked: {}", e);
                    self.stats.probe_failures += 1;
                    continue;
                }
            };
            self.stats.probed += 1;

            match result {
                Ok(inventory) if inventory.needs_captions() => {
                    self.stats.eligible += 1;
                    info!(
                        "Found candidate: {} ({})",
                        candidate.path.display(),
                        format_size(candidate.size_bytes, DECIMAL)
                    );
                    slots[idx] = Some(candidate);
                }
                Ok(inventory) if inventory.has_subtitle => {
                    debug!("Skipping {}: already has a caption stream", candidate.path.display());
                }
                Ok(_) => {
                    debug!("Skipping {}: no audio stream", candidate.path.display());
                }
                Err(e) => {
                    self.stats.probe_failures += 1;
                    warn!("{}", e);
                }
            }
        }

        slots.into_iter().flatten().collect()
    }

    /// Drain the whole scan (used for dry runs)
    pub async fn collect_all(&mut self, batch_size: usize) -> Vec<CandidateFile> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_batch(batch_size).await {
            all.extend(batch);
            if self.token.stop_requested() {
                break;
            }
        }
        all
    }
}

#[async_trait]
impl CandidateSource for CandidateScanner {
    async fn next_batch(&mut self, max: usize) -> Option<Vec<CandidateFile>> {
        if self.exhausted {
            return None;
        }
        let max = max.max(1);
        let mut eligible = Vec::new();

        while eligible.len() < max && !self.exhausted {
            if self.token.stop_requested() {
                break;
            }

            let want = max - eligible.len();
            let mut pending = Vec::with_capacity(want);
            while pending.len() < want {
                // matches can be sparse; a refill may otherwise walk the whole library
                if self.token.stop_requested() {
                    break;
                }
                match self.walker.next() {
                    Some(Ok(path)) => {
                        self.stats.entries += 1;
                        if self.stats.entries % 1000 == 0 {
                            info!("Scanned {} entries so far...", self.stats.entries);
                        }
                        if let Some(candidate) = self.prefilter(path) {
                            pending.push(candidate);
                        }
                    }
                    Some(Err(e)) => warn!("{}", e),
                    None => {
                        self.exhausted = true;
                        break;
                    }
                }
            }

            if !pending.is_empty() {
                eligible.extend(self.probe_all(pending).await);
            }
        }

        if self.exhausted {
            let s = &self.stats;
            info!(
                "Scan complete: {} entries, {} keyword matches, {} probed, {} eligible, {} probe failures",
                s.entries, s.keyword_matches, s.probed, s.eligible, s.probe_failures
            );
        }

        if eligible.is_empty() && self.exhausted {
            None
        } else {
            Some(eligible)
        }
    }
}

/// Lazy sequence of files under the inputs, skipping staging directories
fn discover(inputs: Vec<PathBuf>) -> Discovery {
    Box::new(inputs.into_iter().flat_map(|input| -> Discovery {
        if input.is_dir() {
            info!("Scanning directory: {}", input.display());
            Box::new(
                WalkDir::new(&input)
                    .follow_links(false)
                    .into_iter()
                    .filter_entry(|e| !(e.file_type().is_dir() && is_staging_dir(e.path())))
                    .filter_map(|entry| match entry {
                        Ok(e) if e.path().is_file() => Some(Ok(e.into_path())),
                        Ok(_) => None,
                        Err(e) => Some(Err(PipelineError::Discovery(e.to_string()))),
                    }),
            )
        } else if input.is_file() {
            Box::new(std::iter::once(Ok(input)))
        } else {
            Box::new(std::iter::once(Err(PipelineError::Discovery(format!(
                "input does not exist: {}",
                input.display()
            )))))
        }
    }))
}
