//! Runs the phases of a fit in order and persists each result as soon as it exists.
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::error::Error;
use crate::orchestrator::FitOrchestrator;
use crate::store::{OutputStore, BOOTSTRAP_RESULT, CONFIG, FIT_RESULT, MCMC_RESULT};

/// Completed bins per phase. A phase that was not configured (or not reached) is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineSummary {
    pub n_bins: usize,
    pub fitted: usize,
    pub bootstrapped: Option<usize>,
    pub sampled: Option<usize>,
    pub cancelled: bool,
}

/// Fits every bin, then runs the bootstrap and the MCMC when they are configured.
///
/// The configuration is written to `store` first and every result is written as soon as its
/// phase finishes, so an interrupted run keeps everything completed before the interruption.
/// Once the cancellation token fires, the phase in progress is stored and no further phases
/// start.
///
/// # Errors
///
/// Returns [`Error::Store`] if a result cannot be written and [`Error::Configuration`] if the
/// configuration cannot be encoded.
pub fn run(orchestrator: &FitOrchestrator, store: &OutputStore) -> Result<PipelineSummary, Error> {
    let config = orchestrator.config();
    let token = orchestrator.cancellation_token();
    store.update(CONFIG, &config.to_toml()?)?;
    let mut summary = PipelineSummary {
        n_bins: orchestrator.n_bins(),
        ..Default::default()
    };

    let fit = orchestrator.run_fit();
    store.update(FIT_RESULT, &fit)?;
    summary.fitted = fit.n_complete();
    if token.is_cancelled() {
        warn!("Cancelled after the nominal fit");
        summary.cancelled = true;
        return Ok(summary);
    }

    if config.bootstrap.is_some() {
        let bootstrap = orchestrator.run_bootstrap(&fit)?;
        store.update(BOOTSTRAP_RESULT, &bootstrap)?;
        summary.bootstrapped = Some(bootstrap.n_complete());
        if token.is_cancelled() {
            warn!("Cancelled after the bootstrap");
            summary.cancelled = true;
            return Ok(summary);
        }
    }

    if config.mcmc.is_some() {
        let mcmc = orchestrator.run_mcmc(&fit)?;
        store.update(MCMC_RESULT, &mcmc)?;
        summary.sampled = Some(mcmc.n_complete());
        summary.cancelled = token.is_cancelled();
    }

    info!("Results written to {}", store.path().display());
    Ok(summary)
}

/// Runs [`run`] on a background thread.
pub fn spawn(
    orchestrator: Arc<FitOrchestrator>,
    store: Arc<OutputStore>,
) -> JoinHandle<Result<PipelineSummary, Error>> {
    thread::spawn(move || run(&orchestrator, &store))
}
