//! Binned partial-wave fits of polarized photoproduction data with $`Z_{\ell}^{m}`$ amplitudes.
//!
//! A fit is described by a [`config::FitConfig`]: the waves of each reflectivity sector, the
//! invariant-mass binning, and the settings of the three phases. The
//! [`orchestrator::FitOrchestrator`] bins the data and accepted Monte Carlo, then
//!
//! 1. minimizes the extended negative log-likelihood of every bin from many random starting
//!    points ([`orchestrator::FitOrchestrator::run_fit`]),
//! 2. optionally refits bootstrap resamples of the data
//!    ([`orchestrator::FitOrchestrator::run_bootstrap`]),
//! 3. optionally samples the posterior with an affine-invariant ensemble until the integrated
//!    autocorrelation time settles ([`orchestrator::FitOrchestrator::run_mcmc`]).
//!
//! [`pipeline::run`] chains the phases and writes every result to an [`store::OutputStore`].
//!
//! ```
//! use zlmfit::prelude::*;
//!
//! let wave: Wave = "2+1-".parse().unwrap();
//! assert_eq!(wave.l(), 2);
//! assert_eq!(wave.m(), 1);
//! assert_eq!(wave.r(), Reflectivity::Negative);
//! assert_eq!(wave.to_string(), "2+1-");
//! ```
pub mod amplitude;
pub mod binning;
pub mod config;
pub mod control;
pub mod convergence;
pub mod dataset;
pub mod error;
pub mod fit;
pub mod four_momentum;
pub mod gluex;
pub mod likelihood;
pub mod manager;
pub mod orchestrator;
pub mod pipeline;
pub mod rng;
pub mod store;
pub mod variable;
pub mod wave;

pub mod prelude {
    pub use crate::amplitude::{Amplitude, ComplexScalar, Node, Scalar};
    pub use crate::binning::BinnedDataset;
    pub use crate::config::{
        BinningConfig, BootstrapConfig, ConfigurationError, FitConfig, McmcConfig, RestartConfig,
        WaveConfig,
    };
    pub use crate::control::{CancellationToken, LogProgress, Progress, ProgressEvent};
    pub use crate::convergence::{ConvergenceCriterion, ConvergenceObserver, WaveProjector};
    pub use crate::dataset::{Dataset, DatasetError, Event};
    pub use crate::error::Error;
    pub use crate::fit::{Function, Minimizer, NelderMead, Status};
    pub use crate::four_momentum::FourMomentum;
    pub use crate::gluex::{Ylm, Zlm};
    pub use crate::likelihood::ExtendedLogLikelihood;
    pub use crate::manager::{Manager, Model};
    pub use crate::orchestrator::{
        BinOutcome, BootstrapResult, FitOrchestrator, FitResult, MCMCResult, McmcSample,
    };
    pub use crate::store::OutputStore;
    pub use crate::variable::{
        Angles, CosTheta, Mass, Phi, PolAngle, PolMagnitude, Polarization, Variable,
    };
    pub use crate::wave::{build_model, ModelError, Reflectivity, Wave, WaveError};
}
