use thiserror::Error;

use crate::config::ConfigurationError;
use crate::dataset::DatasetError;
use crate::fit::{McmcError, MinimizerError};
use crate::store::StoreError;
use crate::wave::{ModelError, WaveError};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Wave(#[from] WaveError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Minimizer(#[from] MinimizerError),
    #[error(transparent)]
    Mcmc(#[from] McmcError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("The pipeline thread panicked")]
    Panicked,
}
