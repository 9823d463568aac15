use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use log::{error, warn};
use crate::process;

/// How far shutdown has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStage {
    Running,
    /// Finish in-flight jobs, admit nothing new
    Stopping,
    /// Terminate now
    Aborting,
}

/// Process-wide two-stage shutdown flags.
///
/// Cloning shares the same flags. Flags only ever go from false to true.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Flags>,
}

#[derive(Debug, Default)]
struct Flags {
    stop: AtomicBool,
    abort: AtomicBool,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::Acquire)
    }

    pub fn abort_requested(&self) -> bool {
        self.inner.abort.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::Release);
    }

    pub fn request_abort(&self) {
        self.inner.stop.store(true, Ordering::Release);
        self.inner.abort.store(true, Ordering::Release);
    }

    /// Record one interrupt: the first requests a stop, any later one an abort
    pub fn interrupt(&self) -> ShutdownStage {
        if self.inner.stop.swap(true, Ordering::AcqRel) {
            self.inner.abort.store(true, Ordering::Release);
            ShutdownStage::Aborting
        } else {
            ShutdownStage::Stopping
        }
    }

    pub fn stage(&self) -> ShutdownStage {
        if self.abort_requested() {
            ShutdownStage::Aborting
        } else if self.stop_requested() {
            ShutdownStage::Stopping
        } else {
            ShutdownStage::Running
        }
    }
}

/// Exit code used when a second interrupt forces termination
pub const ABORT_EXIT_CODE: i32 = 130;

/// Watch for Ctrl+C: the first press stops admission, the second kills the
/// running tools and exits the process.
///
/// Tools run in their own process groups, so only the daemon sees the first press.
pub fn install_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }

            match token.interrupt() {
                ShutdownStage::Stopping => {
                    warn!("Received interrupt. Finishing current jobs; press Ctrl+C again to abort.");
                }
                _ => {
                    error!("Received second interrupt. Aborting now.");
                    let killed = process::kill_running_tools();
                    if killed > 0 {
                        warn!("Killed {} running tool process(es)", killed);
                    }
                    std::process::exit(ABORT_EXIT_CODE);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_stage_interrupt() {
        let token = CancellationToken::new();
        assert_eq!(token.stage(), ShutdownStage::Running);

        assert_eq!(token.interrupt(), ShutdownStage::Stopping);
        assert!(token.stop_requested());
        assert!(!token.abort_requested());

        assert_eq!(token.interrupt(), ShutdownStage::Aborting);
        assert!(token.abort_requested());
        assert_eq!(token.stage(), ShutdownStage::Aborting);
    }

    #[test]
    fn test_clones_share_flags() {
        let token = CancellationToken::new();
        let observer = token.clone();
        token.request_stop();
        assert!(observer.stop_requested());
        // stop is never reset by further requests
        observer.request_abort();
        assert!(token.stop_requested() && token.abort_requested());
    }
}
