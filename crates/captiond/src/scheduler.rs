use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::Mutex;
use crate::cancel::CancellationToken;
use crate::scan::CandidateFile;

/// Anything that can hand the scheduler batches of eligible candidates
#[async_trait]
pub trait CandidateSource: Send {
    /// Up to `max` more candidates, or `None` once the source is exhausted.
    /// An empty batch means "nothing this time, ask again".
    async fn next_batch(&mut self, max: usize) -> Option<Vec<CandidateFile>>;
}

#[derive(Debug)]
struct QueueEntry {
    size_bytes: u64,
    seq: u64,
    candidate: CandidateFile,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.size_bytes, self.seq).cmp(&(other.size_bytes, other.seq))
    }
}

/// Min-queue on file size; equal sizes come out in insertion order
#[derive(Debug, Default)]
pub struct ScheduleQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    next_seq: u64,
}

impl ScheduleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: CandidateFile) {
        let entry = QueueEntry {
            size_bytes: candidate.size_bytes,
            seq: self.next_seq,
            candidate,
        };
        self.next_seq += 1;
        self.heap.push(Reverse(entry));
    }

    pub fn dequeue(&mut self) -> Option<CandidateFile> {
        self.heap.pop().map(|Reverse(entry)| entry.candidate)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

struct SchedulerState<S> {
    queue: ScheduleQueue,
    source: S,
    exhausted: bool,
    refills: u64,
}

/// Smallest-first job queue that refills itself from a candidate source.
///
/// Shared by all workers. A worker asking for work while the queue is empty
/// triggers a refill; others wait on the lock until data or exhaustion.
pub struct Scheduler<S> {
    state: Mutex<SchedulerState<S>>,
    batch_size: usize,
    token: CancellationToken,
}

impl<S: CandidateSource> Scheduler<S> {
    pub fn new(source: S, batch_size: usize, token: CancellationToken) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                queue: ScheduleQueue::new(),
                source,
                exhausted: false,
                refills: 0,
            }),
            batch_size: batch_size.max(1),
            token,
        }
    }

    pub async fn enqueue(&self, candidate: CandidateFile) {
        self.state.lock().await.queue.enqueue(candidate);
    }

    /// Next candidate, or `None` when a stop was requested or both the queue
    /// and the source are exhausted.
    pub async fn dequeue(&self) -> Option<CandidateFile> {
        let mut state = self.state.lock().await;

        loop {
            if self.token.stop_requested() {
                debug!("Scheduler: stop requested, not handing out work");
                return None;
            }

            if let Some(candidate) = state.queue.dequeue() {
                return Some(candidate);
            }

            if state.exhausted {
                return None;
            }

            match state.source.next_batch(self.batch_size).await {
                Some(batch) => {
                    state.refills += 1;
                    info!("Scheduler: refill #{} queued {} candidate(s)", state.refills, batch.len());
                    for candidate in batch {
                        state.queue.enqueue(candidate);
                    }
                }
                None => {
                    info!("Scheduler: candidate source exhausted");
                    state.exhausted = true;
                }
            }
        }
    }

    /// Candidates currently queued (not counting what the source still holds)
    pub async fn queued(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_exhausted(&self) -> bool {
        let state = self.state.lock().await;
        state.exhausted && state.queue.is_empty()
    }

    /// Give the source back, e.g. to restart a scan
    pub fn into_source(self) -> S {
        self.state.into_inner().source
    }
}
