use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod autocorrelation;
pub mod mcmc;
pub mod nelder_mead;

pub use autocorrelation::{
    integrated_autocorrelation_times, IntegratedAutocorrelation, TauEstimator,
};
pub use mcmc::{Ensemble, EnsembleSampler, MCMCObserver, McmcError, Signal};
pub use nelder_mead::NelderMead;

/// A real-valued objective over $`\mathbb{R}^n`$.
pub trait Function: Sync {
    fn call(&self, x: &[f64]) -> f64;
    fn dimension(&self) -> usize;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MinimizerError {
    #[error("Expected a starting point with {expected} parameters, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Minimization ended at a non-finite objective value ({fx}) after {n_evals} evaluations")]
    NonFinite { fx: f64, n_evals: usize },
    #[error("The simplex solver failed: {reason}")]
    Solver { reason: String },
}

/// The outcome of one local minimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub x: Vec<f64>,
    pub fx: f64,
    pub converged: bool,
    pub n_evals: usize,
}

/// A local minimizer usable behind a trait object.
pub trait Minimizer: Sync + Send {
    fn minimize(&self, function: &dyn Function, x0: &[f64]) -> Result<Status, MinimizerError>;
}

/// Picks the candidate with the lowest finite objective value. Ties keep the earliest candidate
/// and failed or non-finite candidates are never selected.
pub fn best_of<I>(candidates: I) -> Option<Status>
where
    I: IntoIterator<Item = Result<Status, MinimizerError>>,
{
    candidates
        .into_iter()
        .filter_map(Result::ok)
        .filter(|status| status.fx.is_finite())
        .fold(None, |best: Option<Status>, status| match best {
            Some(best) if best.fx <= status.fx => Some(best),
            _ => Some(status),
        })
}
