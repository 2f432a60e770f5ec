use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

/// A shared flag which asks long-running phases to stop.
///
/// Cloning the token shares the flag, so cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A unit of completed work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    /// One restart of the nominal fit in `bin` finished, or was skipped because the bin is
    /// empty. Every bin reports `niters` of these unless the fit is cancelled.
    Restart { bin: usize, restart: usize },
    /// Every restart of `bin` finished.
    BinFitted { bin: usize, fx: Option<f64> },
    /// One bootstrap resample of `bin` was refit.
    Resample { bin: usize, index: usize },
    /// The MCMC chain of `bin` stopped after `steps` steps.
    ChainFinished {
        bin: usize,
        steps: usize,
        converged: bool,
    },
}

/// Receives [`ProgressEvent`]s from worker threads as work completes.
pub trait Progress: Sync + Send {
    fn report(&self, event: ProgressEvent);
}

impl Progress for () {
    fn report(&self, _event: ProgressEvent) {}
}

/// Reports progress through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Restart { bin, restart } => {
                debug!("Bin {bin}: restart {restart} finished");
            }
            ProgressEvent::BinFitted { bin, fx: Some(fx) } => {
                info!("Bin {bin}: best fit -2lnL = {fx}");
            }
            ProgressEvent::BinFitted { bin, fx: None } => {
                info!("Bin {bin}: no usable fit");
            }
            ProgressEvent::Resample { bin, index } => {
                debug!("Bin {bin}: bootstrap resample {index} finished");
            }
            ProgressEvent::ChainFinished {
                bin,
                steps,
                converged,
            } => {
                info!("Bin {bin}: chain stopped after {steps} steps (converged: {converged})");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
