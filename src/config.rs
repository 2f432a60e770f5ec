use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convergence::ConvergenceCriterion;
use crate::fit::NelderMead;
use crate::wave::Wave;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to read configuration {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("Bin {bin} does not exist (there are {bins} bins)")]
    UnknownBin { bin: usize, bins: usize },
    #[error("Result has {found} bins but the data is binned into {expected}")]
    MismatchedBins { expected: usize, found: usize },
    #[error("The {phase} phase is not configured")]
    PhaseDisabled { phase: &'static str },
    #[error("Event {event} of the {sample} has {found} particles but at least {needed} are needed")]
    MissingParticles {
        sample: &'static str,
        event: usize,
        needed: usize,
        found: usize,
    },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidField {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinningConfig {
    #[serde(default = "BinningConfig::default_bins")]
    pub bins: usize,
    #[serde(default = "BinningConfig::default_range")]
    pub range: (f64, f64),
    /// Particles whose invariant mass is binned.
    #[serde(default = "BinningConfig::default_mass")]
    pub mass: Vec<usize>,
}

impl BinningConfig {
    fn default_bins() -> usize {
        40
    }
    fn default_range() -> (f64, f64) {
        (1.0, 2.0)
    }
    fn default_mass() -> Vec<usize> {
        vec![2, 3]
    }
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            bins: Self::default_bins(),
            range: Self::default_range(),
            mass: Self::default_mass(),
        }
    }
}

/// Waves of each reflectivity sector and the index of each sector's anchor wave.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaveConfig {
    #[serde(default)]
    pub positive: Vec<Wave>,
    #[serde(default)]
    pub positive_anchor: Option<usize>,
    #[serde(default)]
    pub negative: Vec<Wave>,
    #[serde(default)]
    pub negative_anchor: Option<usize>,
}

impl WaveConfig {
    /// Every selected wave, positive sector first.
    pub fn waves(&self) -> Vec<Wave> {
        self.positive
            .iter()
            .chain(&self.negative)
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestartConfig {
    #[serde(default = "RestartConfig::default_niters")]
    pub niters: usize,
    /// Starting points are drawn uniformly from `[-half_width, half_width]` per parameter.
    #[serde(default = "RestartConfig::default_half_width")]
    pub half_width: f64,
}

impl RestartConfig {
    fn default_niters() -> usize {
        20
    }
    fn default_half_width() -> f64 {
        100.0
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            niters: Self::default_niters(),
            half_width: Self::default_half_width(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    #[serde(default = "BootstrapConfig::default_nboot")]
    pub nboot: usize,
}

impl BootstrapConfig {
    fn default_nboot() -> usize {
        20
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            nboot: Self::default_nboot(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McmcConfig {
    #[serde(default = "McmcConfig::default_nwalkers")]
    pub nwalkers: usize,
    /// Per-axis standard deviation of the initial walker cloud around the best fit.
    #[serde(default = "McmcConfig::default_sigma")]
    pub sigma: f64,
    #[serde(default = "McmcConfig::default_ntau")]
    pub ntau: usize,
    #[serde(default = "McmcConfig::default_dtau")]
    pub dtau: f64,
    #[serde(default = "McmcConfig::default_burn_in")]
    pub burn_in: f64,
    #[serde(default = "McmcConfig::default_max_steps")]
    pub max_steps: usize,
}

impl McmcConfig {
    fn default_nwalkers() -> usize {
        20
    }
    fn default_sigma() -> f64 {
        0.1
    }
    fn default_ntau() -> usize {
        20
    }
    fn default_dtau() -> f64 {
        0.05
    }
    fn default_burn_in() -> f64 {
        0.5
    }
    fn default_max_steps() -> usize {
        3000
    }
    pub fn criterion(&self) -> ConvergenceCriterion {
        ConvergenceCriterion {
            ntau: self.ntau,
            dtau: self.dtau,
            burn_in: self.burn_in,
        }
    }
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            nwalkers: Self::default_nwalkers(),
            sigma: Self::default_sigma(),
            ntau: Self::default_ntau(),
            dtau: Self::default_dtau(),
            burn_in: Self::default_burn_in(),
            max_steps: Self::default_max_steps(),
        }
    }
}

/// The full description of a fit, read from TOML.
///
/// ```toml
/// seed = 0
///
/// [binning]
/// bins = 40
/// range = [1.0, 2.0]
///
/// [waves]
/// positive = ["0+0+", "2+2+"]
/// positive_anchor = 0
///
/// [bootstrap]
/// nboot = 20
///
/// [mcmc]
/// nwalkers = 20
/// ```
///
/// The `bootstrap` and `mcmc` tables are optional; a phase without a table is skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FitConfig {
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub binning: BinningConfig,
    pub waves: WaveConfig,
    #[serde(default)]
    pub fit: RestartConfig,
    #[serde(default)]
    pub bootstrap: Option<BootstrapConfig>,
    #[serde(default)]
    pub mcmc: Option<McmcConfig>,
    #[serde(default)]
    pub minimizer: NelderMead,
}

impl FitConfig {
    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if the file cannot be read or parsed, or fails
    /// [`FitConfig::validate`].
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if the text does not parse or fails
    /// [`FitConfig::validate`].
    pub fn from_toml(contents: &str) -> Result<Self, ConfigurationError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigurationError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every numeric field. Wave selections are checked when the model is built.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let (lower, upper) = self.binning.range;
        if self.binning.bins == 0 {
            return Err(invalid("binning.bins", "must be at least 1"));
        }
        if !(lower.is_finite() && upper.is_finite() && lower < upper) {
            return Err(invalid(
                "binning.range",
                format!("lower edge {lower} must be below upper edge {upper}"),
            ));
        }
        if self.binning.mass.is_empty() {
            return Err(invalid("binning.mass", "needs at least one particle"));
        }
        if self.fit.niters == 0 {
            return Err(invalid("fit.niters", "must be at least 1"));
        }
        if !(self.fit.half_width > 0.0 && self.fit.half_width.is_finite()) {
            return Err(invalid("fit.half_width", "must be positive"));
        }
        if let Some(bootstrap) = &self.bootstrap {
            if bootstrap.nboot == 0 {
                return Err(invalid("bootstrap.nboot", "must be at least 1"));
            }
        }
        if let Some(mcmc) = &self.mcmc {
            if mcmc.nwalkers < 2 {
                return Err(invalid("mcmc.nwalkers", "must be at least 2"));
            }
            if !(mcmc.sigma > 0.0 && mcmc.sigma.is_finite()) {
                return Err(invalid("mcmc.sigma", "must be positive"));
            }
            if mcmc.ntau == 0 {
                return Err(invalid("mcmc.ntau", "must be at least 1"));
            }
            if !(mcmc.dtau > 0.0 && mcmc.dtau.is_finite()) {
                return Err(invalid("mcmc.dtau", "must be positive"));
            }
            if !(0.0..1.0).contains(&mcmc.burn_in) {
                return Err(invalid("mcmc.burn_in", "must lie in [0, 1)"));
            }
            if mcmc.max_steps == 0 {
                return Err(invalid("mcmc.max_steps", "must be at least 1"));
            }
        }
        if self.minimizer.max_iters == 0 {
            return Err(invalid("minimizer.max_iters", "must be at least 1"));
        }
        if !(self.minimizer.sd_tolerance >= 0.0) {
            return Err(invalid("minimizer.sd_tolerance", "must be non-negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
seed = 7

[binning]
bins = 10
range = [1.0, 1.5]

[waves]
positive = ["0+0+", "2+2+"]
positive_anchor = 0
negative = ["0+0-"]
negative_anchor = 0

[fit]
niters = 5

[bootstrap]
nboot = 3

[mcmc]
nwalkers = 8
max_steps = 100
"#;

    fn field(result: Result<(), ConfigurationError>) -> &'static str {
        match result {
            Err(ConfigurationError::InvalidField { field, .. }) => field,
            other => panic!("expected an invalid field, got {other:?}"),
        }
    }

    #[test]
    fn parses_example() {
        let config = FitConfig::from_toml(EXAMPLE).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.binning.bins, 10);
        assert_eq!(config.binning.range, (1.0, 1.5));
        assert_eq!(config.binning.mass, [2, 3]);
        assert_eq!(config.waves.waves().len(), 3);
        assert_eq!(config.waves.positive[1].to_string(), "2+2+");
        assert_eq!(config.fit.niters, 5);
        assert_eq!(config.fit.half_width, 100.0);
        assert_eq!(config.bootstrap.unwrap().nboot, 3);
        let mcmc = config.mcmc.unwrap();
        assert_eq!(mcmc.nwalkers, 8);
        assert_eq!(mcmc.sigma, 0.1);
        assert_eq!(mcmc.ntau, 20);
        assert_eq!(mcmc.dtau, 0.05);
        assert_eq!(mcmc.max_steps, 100);
    }

    #[test]
    fn optional_phases_default_to_off() {
        let config = FitConfig::from_toml(
            r#"
[waves]
positive = ["0+0+"]
positive_anchor = 0
"#,
        )
        .unwrap();
        assert!(config.bootstrap.is_none());
        assert!(config.mcmc.is_none());
        assert_eq!(config.binning, BinningConfig::default());
    }

    #[test]
    fn rejects_bad_waves_and_unknown_keys() {
        assert!(matches!(
            FitConfig::from_toml("[waves]\npositive = [\"1+2+\"]\n"),
            Err(ConfigurationError::Parse(_))
        ));
        assert!(matches!(
            FitConfig::from_toml("colour = 1\n[waves]\n"),
            Err(ConfigurationError::Parse(_))
        ));
    }

    #[test]
    fn validation_rejects_each_field() {
        let base = FitConfig::from_toml(EXAMPLE).unwrap();
        let check = |edit: fn(&mut FitConfig)| {
            let mut config = base.clone();
            edit(&mut config);
            field(config.validate())
        };
        assert_eq!(check(|c| c.binning.bins = 0), "binning.bins");
        assert_eq!(check(|c| c.binning.range = (2.0, 1.0)), "binning.range");
        assert_eq!(check(|c| c.binning.range = (1.0, 1.0)), "binning.range");
        assert_eq!(check(|c| c.fit.niters = 0), "fit.niters");
        assert_eq!(
            check(|c| c.bootstrap = Some(BootstrapConfig { nboot: 0 })),
            "bootstrap.nboot"
        );
        let mcmc_check = |edit: fn(&mut McmcConfig)| {
            let mut config = base.clone();
            if let Some(mcmc) = config.mcmc.as_mut() {
                edit(mcmc);
            }
            field(config.validate())
        };
        assert_eq!(mcmc_check(|m| m.nwalkers = 1), "mcmc.nwalkers");
        assert_eq!(mcmc_check(|m| m.sigma = 0.0), "mcmc.sigma");
        assert_eq!(mcmc_check(|m| m.ntau = 0), "mcmc.ntau");
        assert_eq!(mcmc_check(|m| m.dtau = -0.1), "mcmc.dtau");
        assert_eq!(mcmc_check(|m| m.burn_in = 1.0), "mcmc.burn_in");
        assert_eq!(mcmc_check(|m| m.max_steps = 0), "mcmc.max_steps");
        assert_eq!(
            check(|c| c.minimizer.sd_tolerance = -1.0),
            "minimizer.sd_tolerance"
        );
    }

    #[test]
    fn round_trips_through_toml() {
        let config = FitConfig::from_toml(EXAMPLE).unwrap();
        let text = config.to_toml().unwrap();
        assert_eq!(FitConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            FitConfig::from_path("/nonexistent/zlmfit.toml"),
            Err(ConfigurationError::Io { .. })
        ));
    }
}
