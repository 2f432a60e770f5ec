use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::control::CancellationToken;
use crate::fit::{Ensemble, IntegratedAutocorrelation, MCMCObserver, Signal, TauEstimator};
use crate::likelihood::ExtendedLogLikelihood;
use crate::wave::Wave;

/// Projected intensities at one point in parameter space.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub total: f64,
    pub waves: Vec<f64>,
}

pub trait Projector: Sync + Send {
    fn project(&self, parameters: &[f64]) -> Projection;
}

/// Projects the fitted intensity onto the accepted Monte Carlo, in total and for each wave on
/// its own (only the wave's coefficient and basis function active).
#[derive(Debug, Clone)]
pub struct WaveProjector {
    nll: ExtendedLogLikelihood,
    masks: Vec<Vec<bool>>,
}

impl WaveProjector {
    pub fn new(nll: ExtendedLogLikelihood, waves: &[Wave]) -> Self {
        let masks = waves
            .iter()
            .map(|wave| {
                nll.model()
                    .mask(&[wave.basis_name(), wave.coefficient_name()])
            })
            .collect();
        Self { nll, masks }
    }
}

impl Projector for WaveProjector {
    fn project(&self, parameters: &[f64]) -> Projection {
        Projection {
            total: self.nll.project(parameters).iter().sum(),
            waves: self
                .masks
                .iter()
                .map(|mask| {
                    self.nll
                        .project_with_mask(parameters, mask)
                        .iter()
                        .sum()
                })
                .collect(),
        }
    }
}

/// The stopping rule for a chain.
///
/// Every `ntau` steps the integrated autocorrelation time $`\bar{\tau}`$ of the projected wave
/// intensities is estimated, and the chain has converged once it is longer than
/// `ntau` autocorrelation times and $`\bar{\tau}`$ changed by less than a relative `dtau` since
/// the previous check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceCriterion {
    pub ntau: usize,
    pub dtau: f64,
    /// Fraction of the chain discarded as burn-in before estimating $`\tau`$.
    pub burn_in: f64,
}

impl ConvergenceCriterion {
    pub fn is_check_step(&self, step: usize) -> bool {
        step % self.ntau == 0
    }

    /// Number of leading steps to discard at a check after `steps` steps.
    ///
    /// The burn-in fraction of the chain, clamped to `previous_tau * ntau` when a previous
    /// estimate exists, and never shorter than the previous window.
    pub fn discard_window(&self, steps: usize, previous_tau: f64, previous_window: usize) -> usize {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let burn_in = (self.burn_in * steps as f64).floor() as usize;
        let window = if previous_tau.is_finite() {
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_precision_loss
            )]
            let clamp = (previous_tau * self.ntau as f64).floor().max(0.0) as usize;
            burn_in.min(clamp)
        } else {
            burn_in
        };
        window.max(previous_window)
    }

    /// Both conditions must hold: `steps > ntau * tau` and `|previous_tau - tau| / tau < dtau`.
    pub fn is_converged(&self, steps: usize, previous_tau: f64, tau: f64) -> bool {
        #[allow(clippy::cast_precision_loss)]
        let long_enough = steps as f64 > self.ntau as f64 * tau;
        let stable = (previous_tau - tau).abs() / tau < self.dtau;
        tau.is_finite() && long_enough && stable
    }
}

/// The record of one convergence check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceCheck {
    pub step: usize,
    pub window: usize,
    /// One estimate per projected wave; `tau` is their mean.
    pub taus: Vec<f64>,
    pub tau: f64,
    pub converged: bool,
}

/// Watches an MCMC chain and halts it once [`ConvergenceCriterion`] is met.
///
/// After every step the latest walker positions are projected and the total and per-wave
/// intensities are appended to the observer's series. The ensemble itself is only read.
pub struct ConvergenceObserver<P, T = IntegratedAutocorrelation> {
    projector: P,
    estimator: T,
    criterion: ConvergenceCriterion,
    /// `[step][walker]`
    totals: Vec<Vec<f64>>,
    /// `[step][walker][wave]`
    waves: Vec<Vec<Vec<f64>>>,
    latest_tau: f64,
    window: usize,
    converged: bool,
    checks: Vec<ConvergenceCheck>,
    token: Option<CancellationToken>,
    bin: Option<usize>,
}

impl<P: Projector> ConvergenceObserver<P> {
    pub fn new(projector: P, criterion: ConvergenceCriterion) -> Self {
        Self::with_estimator(projector, IntegratedAutocorrelation::default(), criterion)
    }
}

impl<P: Projector, T: TauEstimator> ConvergenceObserver<P, T> {
    pub fn with_estimator(projector: P, estimator: T, criterion: ConvergenceCriterion) -> Self {
        Self {
            projector,
            estimator,
            criterion,
            totals: Vec::new(),
            waves: Vec::new(),
            latest_tau: f64::INFINITY,
            window: 0,
            converged: false,
            checks: Vec::new(),
            token: None,
            bin: None,
        }
    }

    /// Halt the chain as soon as `token` is cancelled.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Label diagnostics with a bin index.
    pub fn with_bin(mut self, bin: usize) -> Self {
        self.bin = Some(bin);
        self
    }

    /// The most recent estimate of $`\bar{\tau}`$, or infinity before the first check.
    pub fn latest_tau(&self) -> f64 {
        self.latest_tau
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn checks(&self) -> &[ConvergenceCheck] {
        &self.checks
    }

    pub fn totals(&self) -> &[Vec<f64>] {
        &self.totals
    }

    /// Per-wave series after the current discard window, as `[walker][step][wave]`.
    fn retained_series(&self) -> Vec<Vec<Vec<f64>>> {
        let n_walkers = self.waves.first().map_or(0, Vec::len);
        (0..n_walkers)
            .map(|walker| {
                self.waves[self.window..]
                    .iter()
                    .map(|step| step[walker].clone())
                    .collect()
            })
            .collect()
    }

    fn check(&mut self, step: usize) -> bool {
        self.window = self
            .criterion
            .discard_window(step, self.latest_tau, self.window);
        let taus = self.estimator.integrated_times(&self.retained_series());
        #[allow(clippy::cast_precision_loss)]
        let tau = taus.iter().sum::<f64>() / taus.len() as f64;
        let converged = self.criterion.is_converged(step, self.latest_tau, tau);
        #[allow(clippy::cast_precision_loss)]
        let steps_needed = self.criterion.ntau as f64 * tau;
        info!(
            bin = self.bin,
            step,
            window = self.window,
            ?taus,
            tau,
            previous_tau = self.latest_tau,
            steps_needed,
            dtau = self.criterion.dtau,
            converged,
            "Convergence check"
        );
        self.checks.push(ConvergenceCheck {
            step,
            window: self.window,
            taus,
            tau,
            converged,
        });
        self.latest_tau = tau;
        converged
    }
}

impl<P: Projector, T: TauEstimator> MCMCObserver for ConvergenceObserver<P, T> {
    fn callback(&mut self, step: usize, ensemble: &Ensemble) -> Signal {
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            debug!(bin = self.bin, step, "Chain cancelled");
            return Signal::Halt;
        }
        let projections: Vec<Projection> = ensemble
            .latest()
            .into_iter()
            .map(|x| self.projector.project(x))
            .collect();
        self.totals
            .push(projections.iter().map(|p| p.total).collect());
        self.waves
            .push(projections.into_iter().map(|p| p.waves).collect());
        #[allow(clippy::cast_precision_loss)]
        let mean_total = self.totals[self.totals.len() - 1].iter().sum::<f64>()
            / ensemble.chain().len().max(1) as f64;
        debug!(bin = self.bin, step, mean_total, "MCMC step");
        if !self.criterion.is_check_step(step) {
            return Signal::Continue;
        }
        if self.check(step) {
            self.converged = true;
            Signal::Halt
        } else {
            Signal::Continue
        }
    }
}
