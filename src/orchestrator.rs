use std::sync::Arc;

use itertools::iproduct;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::binning::BinnedDataset;
use crate::config::{BinningConfig, ConfigurationError, FitConfig, McmcConfig};
use crate::control::{CancellationToken, LogProgress, Progress, ProgressEvent};
use crate::convergence::{ConvergenceCheck, ConvergenceObserver, WaveProjector};
use crate::dataset::Dataset;
use crate::error::Error;
use crate::fit::{
    best_of, Ensemble, EnsembleSampler, McmcError, Minimizer, MinimizerError, Status,
};
use crate::likelihood::ExtendedLogLikelihood;
use crate::manager::Model;
use crate::rng::{bin_stream, resample_seed, Phase};
use crate::variable::Mass;
use crate::wave::{build_model, MODEL_PARTICLES};

/// What became of one bin in one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BinOutcome<T> {
    Complete(T),
    Failed(String),
    Cancelled,
}

impl<T> BinOutcome<T> {
    pub fn as_complete(&self) -> Option<&T> {
        match self {
            Self::Complete(value) => Some(value),
            _ => None,
        }
    }
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl<T> From<BinFitFailure> for BinOutcome<T> {
    fn from(failure: BinFitFailure) -> Self {
        Self::Failed(failure.to_string())
    }
}

/// Why a bin produced no result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BinFitFailure {
    #[error("The bin holds no data or no accepted Monte Carlo")]
    EmptyBin,
    #[error("All {restarts} restarts failed")]
    AllRestartsFailed { restarts: usize },
    #[error("The nominal fit of this bin did not complete")]
    MissingNominalFit,
    #[error("Bootstrap resample {index} failed: {source}")]
    Resample {
        index: usize,
        source: MinimizerError,
    },
    #[error("Invalid walker distribution: {reason}")]
    WalkerDistribution { reason: String },
    #[error(transparent)]
    Sampler(#[from] McmcError),
}

/// One outcome per bin, index-addressed, alongside the bin edges the outcomes refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinnedResult<T> {
    pub edges: Vec<f64>,
    pub bins: Vec<BinOutcome<T>>,
}

impl<T> BinnedResult<T> {
    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }
    pub fn get(&self, bin: usize) -> Option<&BinOutcome<T>> {
        self.bins.get(bin)
    }
    pub fn n_complete(&self) -> usize {
        self.bins.iter().filter(|outcome| outcome.is_complete()).count()
    }
    pub fn any_cancelled(&self) -> bool {
        self.bins.iter().any(BinOutcome::is_cancelled)
    }
}

/// The final state of one bin's Markov chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McmcSample {
    pub ensemble: Ensemble,
    /// The last estimate of the mean integrated autocorrelation time.
    pub tau: f64,
    pub converged: bool,
    pub checks: Vec<ConvergenceCheck>,
}

pub type FitResult = BinnedResult<Status>;
pub type BootstrapResult = BinnedResult<Vec<Status>>;
pub type MCMCResult = BinnedResult<McmcSample>;

/// Runs binned fits of a Zlm model.
///
/// An orchestrator only exists once its configuration has been validated, its model built and
/// its data binned, so every phase can run immediately. Bins are processed in parallel, each
/// with a random stream derived from the configured seed, the phase and the bin index.
pub struct FitOrchestrator {
    config: FitConfig,
    model: Arc<Model>,
    data: Arc<Dataset>,
    accmc: Arc<Dataset>,
    genmc: Option<Arc<Dataset>>,
    binned_data: BinnedDataset,
    binned_accmc: BinnedDataset,
    binned_genmc: Option<BinnedDataset>,
    minimizer: Arc<dyn Minimizer>,
    progress: Arc<dyn Progress>,
    token: CancellationToken,
}

impl FitOrchestrator {
    /// Validates `config`, builds its model and bins both samples by the configured invariant
    /// mass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an invalid configuration or for events with fewer
    /// particles than the binning and the model use, and [`Error::Model`] for an inconsistent
    /// wave selection.
    pub fn new(config: FitConfig, data: Arc<Dataset>, accmc: Arc<Dataset>) -> Result<Self, Error> {
        config.validate()?;
        Self::check_particles(&config.binning, "data", &data)?;
        Self::check_particles(&config.binning, "accepted Monte Carlo", &accmc)?;
        let model = build_model(
            &config.waves.positive,
            config.waves.positive_anchor,
            &config.waves.negative,
            config.waves.negative_anchor,
        )?;
        let (binned_data, binned_accmc) = Self::bin(&config.binning, &data, &accmc);
        info!(
            "Model has {} free parameters; {} data and {} accepted Monte Carlo events in {} bins",
            model.n_parameters(),
            data.len(),
            accmc.len(),
            config.binning.bins
        );
        Ok(Self {
            minimizer: Arc::new(config.minimizer),
            config,
            model: Arc::new(model),
            data,
            accmc,
            genmc: None,
            binned_data,
            binned_accmc,
            binned_genmc: None,
            progress: Arc::new(LogProgress),
            token: CancellationToken::new(),
        })
    }

    fn bin(
        binning: &BinningConfig,
        data: &Dataset,
        accmc: &Dataset,
    ) -> (BinnedDataset, BinnedDataset) {
        (Self::bin_one(binning, data), Self::bin_one(binning, accmc))
    }

    fn bin_one(binning: &BinningConfig, dataset: &Dataset) -> BinnedDataset {
        let mass = Mass::new(binning.mass.iter().copied());
        dataset.bin_by(&mass, binning.bins, binning.range)
    }

    fn check_particles(
        binning: &BinningConfig,
        sample: &'static str,
        dataset: &Dataset,
    ) -> Result<(), ConfigurationError> {
        let needed = binning
            .mass
            .iter()
            .map(|index| index + 1)
            .fold(MODEL_PARTICLES, usize::max);
        match dataset.find_short_event(needed) {
            Some((event, found)) => Err(ConfigurationError::MissingParticles {
                sample,
                event,
                needed,
                found,
            }),
            None => Ok(()),
        }
    }

    /// Attaches a generated Monte Carlo sample, binned like the data.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingParticles`] if an event lacks a particle the binning
    /// or the model uses.
    pub fn with_genmc(mut self, genmc: Arc<Dataset>) -> Result<Self, ConfigurationError> {
        Self::check_particles(&self.config.binning, "generated Monte Carlo", &genmc)?;
        self.binned_genmc = Some(Self::bin_one(&self.config.binning, &genmc));
        info!("{} generated Monte Carlo events", genmc.len());
        self.genmc = Some(genmc);
        Ok(self)
    }

    pub fn with_minimizer<M: Minimizer + 'static>(mut self, minimizer: M) -> Self {
        self.minimizer = Arc::new(minimizer);
        self
    }

    pub fn with_progress<P: Progress + 'static>(mut self, progress: P) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    /// Shares `token` with this orchestrator, so cancelling it stops every running phase.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn binned_data(&self) -> &BinnedDataset {
        &self.binned_data
    }

    pub fn binned_accmc(&self) -> &BinnedDataset {
        &self.binned_accmc
    }

    pub fn binned_genmc(&self) -> Option<&BinnedDataset> {
        self.binned_genmc.as_ref()
    }

    /// Weighted accepted over weighted generated Monte Carlo per bin, or `None` for every bin
    /// without generated events. Empty without a generated sample.
    pub fn acceptance(&self) -> Vec<Option<f64>> {
        let Some(genmc) = &self.binned_genmc else {
            return Vec::new();
        };
        self.binned_accmc
            .iter()
            .zip(genmc.iter())
            .map(|(accmc, genmc)| {
                let generated = genmc.weighted_len();
                (generated != 0.0).then(|| accmc.weighted_len() / generated)
            })
            .collect()
    }

    pub fn n_bins(&self) -> usize {
        self.binned_data.n_bins()
    }

    /// Replaces the binning. Results computed under the previous binning no longer match.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if the new binning is invalid or reads a particle some
    /// event lacks, leaving the previous one in place.
    pub fn rebin(&mut self, binning: BinningConfig) -> Result<(), ConfigurationError> {
        let mut config = self.config.clone();
        config.binning = binning;
        config.validate()?;
        Self::check_particles(&config.binning, "data", &self.data)?;
        Self::check_particles(&config.binning, "accepted Monte Carlo", &self.accmc)?;
        if let Some(genmc) = &self.genmc {
            Self::check_particles(&config.binning, "generated Monte Carlo", genmc)?;
        }
        let (binned_data, binned_accmc) = Self::bin(&config.binning, &self.data, &self.accmc);
        self.binned_genmc = self
            .genmc
            .as_ref()
            .map(|genmc| Self::bin_one(&config.binning, genmc));
        self.config = config;
        self.binned_data = binned_data;
        self.binned_accmc = binned_accmc;
        info!("Rebinned into {} bins", self.n_bins());
        Ok(())
    }

    fn objective(&self, bin: usize) -> ExtendedLogLikelihood {
        ExtendedLogLikelihood::new(
            &self.model,
            &self.binned_data[bin],
            &self.binned_accmc[bin],
        )
    }

    fn is_empty_bin(&self, bin: usize) -> bool {
        !(self.binned_data[bin].weighted_len() > 0.0
            && self.binned_accmc[bin].weighted_len() > 0.0)
    }

    /// The objective of `bin`, with the data replaced by bootstrap resample `resample` when one
    /// is given.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownBin`] if `bin` is out of range.
    pub fn get_objective(
        &self,
        bin: usize,
        resample: Option<usize>,
    ) -> Result<ExtendedLogLikelihood, ConfigurationError> {
        if bin >= self.n_bins() {
            return Err(ConfigurationError::UnknownBin {
                bin,
                bins: self.n_bins(),
            });
        }
        let nll = self.objective(bin);
        Ok(match resample {
            Some(index) => nll.bootstrap(resample_seed(self.config.seed, bin, index)),
            None => nll,
        })
    }

    fn check_shape<T>(&self, result: &BinnedResult<T>) -> Result<(), ConfigurationError> {
        if result.n_bins() == self.n_bins() {
            Ok(())
        } else {
            Err(ConfigurationError::MismatchedBins {
                expected: self.n_bins(),
                found: result.n_bins(),
            })
        }
    }

    fn starting_points(&self, bin: usize, dimension: usize) -> Vec<Vec<f64>> {
        let mut rng = bin_stream(self.config.seed, Phase::Fit, bin);
        let half_width = self.config.fit.half_width;
        (0..self.config.fit.niters)
            .map(|_| {
                (0..dimension)
                    .map(|_| rng.gen_range(-half_width..=half_width))
                    .collect()
            })
            .collect()
    }

    fn fit_bin(&self, bin: usize) -> BinOutcome<Status> {
        if self.token.is_cancelled() {
            return BinOutcome::Cancelled;
        }
        if self.is_empty_bin(bin) {
            warn!("Bin {bin} is empty");
            for restart in 0..self.config.fit.niters {
                self.progress.report(ProgressEvent::Restart { bin, restart });
            }
            self.progress.report(ProgressEvent::BinFitted { bin, fx: None });
            return BinFitFailure::EmptyBin.into();
        }
        let nll = self.objective(bin);
        let starts = self.starting_points(bin, nll.n_free());
        let candidates: Vec<Option<Result<Status, MinimizerError>>> = starts
            .par_iter()
            .enumerate()
            .map(|(restart, x0)| {
                if self.token.is_cancelled() {
                    return None;
                }
                let result = self.minimizer.minimize(&nll, x0);
                match &result {
                    Ok(status) => debug!(
                        "Bin {bin} restart {restart}: -2lnL = {} after {} evaluations",
                        status.fx, status.n_evals
                    ),
                    Err(e) => warn!("Bin {bin} restart {restart} failed: {e}"),
                }
                self.progress
                    .report(ProgressEvent::Restart { bin, restart });
                Some(result)
            })
            .collect();
        let Some(candidates) = candidates.into_iter().collect::<Option<Vec<_>>>() else {
            return BinOutcome::Cancelled;
        };
        let best = best_of(candidates);
        self.progress.report(ProgressEvent::BinFitted {
            bin,
            fx: best.as_ref().map(|status| status.fx),
        });
        match best {
            Some(status) => BinOutcome::Complete(status),
            None => BinFitFailure::AllRestartsFailed {
                restarts: starts.len(),
            }
            .into(),
        }
    }

    /// Minimizes every bin from `niters` random starting points and keeps the lowest minimum.
    ///
    /// Starting points are drawn uniformly from `[-half_width, half_width]` per parameter.
    /// Bins that are empty or whose restarts all fail are [`BinOutcome::Failed`]; bins not
    /// finished when the cancellation token fires are [`BinOutcome::Cancelled`].
    pub fn run_fit(&self) -> FitResult {
        info!(
            "Fitting {} bins with {} restarts each",
            self.n_bins(),
            self.config.fit.niters
        );
        let bins = (0..self.n_bins())
            .into_par_iter()
            .map(|bin| self.fit_bin(bin))
            .collect();
        let result = FitResult {
            edges: self.binned_data.edges().to_vec(),
            bins,
        };
        info!(
            "Fit finished: {}/{} bins complete",
            result.n_complete(),
            result.n_bins()
        );
        result
    }

    fn refit_resample(
        &self,
        bin: usize,
        index: usize,
        x0: &[f64],
    ) -> Option<Result<Status, MinimizerError>> {
        if self.token.is_cancelled() {
            return None;
        }
        let nll = self
            .objective(bin)
            .bootstrap(resample_seed(self.config.seed, bin, index));
        let result = self.minimizer.minimize(&nll, x0);
        if let Err(e) = &result {
            warn!("Bin {bin} bootstrap resample {index} failed: {e}");
        }
        self.progress.report(ProgressEvent::Resample { bin, index });
        Some(result)
    }

    /// Refits `nboot` bootstrap resamples of every bin, each started at the bin's nominal best
    /// fit. Resamples of all bins run in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if no bootstrap is configured or `fit` was computed for a
    /// different number of bins.
    pub fn run_bootstrap(&self, fit: &FitResult) -> Result<BootstrapResult, ConfigurationError> {
        let nboot = self
            .config
            .bootstrap
            .as_ref()
            .ok_or(ConfigurationError::PhaseDisabled { phase: "bootstrap" })?
            .nboot;
        self.check_shape(fit)?;
        info!("Bootstrapping {} bins with {nboot} resamples each", self.n_bins());
        let jobs: Vec<(usize, usize, &Status)> = iproduct!(0..self.n_bins(), 0..nboot)
            .filter_map(|(bin, index)| {
                fit.bins[bin]
                    .as_complete()
                    .map(|status| (bin, index, status))
            })
            .collect();
        let mut refits = jobs
            .par_iter()
            .map(|&(bin, index, nominal)| self.refit_resample(bin, index, &nominal.x))
            .collect::<Vec<_>>()
            .into_iter();
        let bins = fit
            .bins
            .iter()
            .map(|nominal| {
                if !nominal.is_complete() {
                    return if nominal.is_cancelled() {
                        BinOutcome::Cancelled
                    } else {
                        BinFitFailure::MissingNominalFit.into()
                    };
                }
                let mut statuses = Vec::with_capacity(nboot);
                let mut outcome = None;
                for (index, refit) in refits.by_ref().take(nboot).enumerate() {
                    if outcome.is_some() {
                        continue;
                    }
                    match refit {
                        None => outcome = Some(BinOutcome::Cancelled),
                        Some(Err(source)) => {
                            outcome = Some(BinFitFailure::Resample { index, source }.into());
                        }
                        Some(Ok(status)) => statuses.push(status),
                    }
                }
                outcome.unwrap_or(BinOutcome::Complete(statuses))
            })
            .collect();
        let result = BootstrapResult {
            edges: fit.edges.clone(),
            bins,
        };
        info!(
            "Bootstrap finished: {}/{} bins complete",
            result.n_complete(),
            result.n_bins()
        );
        Ok(result)
    }

    fn sample_bin(
        &self,
        bin: usize,
        nominal: &BinOutcome<Status>,
        mcmc: &McmcConfig,
    ) -> BinOutcome<McmcSample> {
        if self.token.is_cancelled() || nominal.is_cancelled() {
            return BinOutcome::Cancelled;
        }
        let Some(nominal) = nominal.as_complete() else {
            return BinFitFailure::MissingNominalFit.into();
        };
        let mut rng = bin_stream(self.config.seed, Phase::Mcmc, bin);
        let spread = match Normal::new(0.0, mcmc.sigma) {
            Ok(spread) => spread,
            Err(e) => {
                return BinFitFailure::WalkerDistribution {
                    reason: e.to_string(),
                }
                .into()
            }
        };
        let walkers: Vec<Vec<f64>> = (0..mcmc.nwalkers)
            .map(|_| {
                nominal
                    .x
                    .iter()
                    .map(|x| x + spread.sample(&mut rng))
                    .collect()
            })
            .collect();
        let nll = self.objective(bin);
        let projector = WaveProjector::new(nll.clone(), &self.config.waves.waves());
        let mut observer = ConvergenceObserver::new(projector, mcmc.criterion())
            .with_token(self.token.clone())
            .with_bin(bin);
        let ensemble = match EnsembleSampler::default().run(
            &nll,
            walkers,
            mcmc.max_steps,
            &mut observer,
            &mut rng,
        ) {
            Ok(ensemble) => ensemble,
            Err(e) => return BinFitFailure::from(e).into(),
        };
        let converged = observer.converged();
        if !converged && self.token.is_cancelled() {
            return BinOutcome::Cancelled;
        }
        self.progress.report(ProgressEvent::ChainFinished {
            bin,
            steps: ensemble.n_steps(),
            converged,
        });
        if !converged {
            warn!("Bin {bin}: chain did not converge within {} steps", mcmc.max_steps);
        }
        BinOutcome::Complete(McmcSample {
            ensemble,
            tau: observer.latest_tau(),
            converged,
            checks: observer.checks().to_vec(),
        })
    }

    /// Samples the posterior of every bin with an ensemble of walkers started in a normal cloud
    /// around the bin's best fit, stopping each chain once its autocorrelation time settles.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if no MCMC is configured or `fit` was computed for a
    /// different number of bins.
    pub fn run_mcmc(&self, fit: &FitResult) -> Result<MCMCResult, ConfigurationError> {
        let mcmc = self
            .config
            .mcmc
            .as_ref()
            .ok_or(ConfigurationError::PhaseDisabled { phase: "mcmc" })?;
        self.check_shape(fit)?;
        info!(
            "Sampling {} bins with {} walkers for at most {} steps",
            self.n_bins(),
            mcmc.nwalkers,
            mcmc.max_steps
        );
        let bins = fit
            .bins
            .par_iter()
            .enumerate()
            .map(|(bin, nominal)| self.sample_bin(bin, nominal, mcmc))
            .collect();
        let result = MCMCResult {
            edges: fit.edges.clone(),
            bins,
        };
        info!(
            "MCMC finished: {}/{} bins complete",
            result.n_complete(),
            result.n_bins()
        );
        Ok(result)
    }
}
