use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::Function;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum McmcError {
    #[error("The stretch move needs at least two walkers, found {n_walkers}")]
    TooFewWalkers { n_walkers: usize },
    #[error("Walker {walker} has {found} parameters, expected {expected}")]
    DimensionMismatch {
        walker: usize,
        expected: usize,
        found: usize,
    },
}

/// The history of an ensemble of walkers.
///
/// Positions are stored as `chain[walker][step][parameter]`, with one entry per completed step.
/// The initial positions are not part of the chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ensemble {
    chain: Vec<Vec<Vec<f64>>>,
    log_probs: Vec<Vec<f64>>,
    accepted: Vec<usize>,
}

impl Ensemble {
    pub(crate) fn new(n_walkers: usize) -> Self {
        Self {
            chain: vec![Vec::new(); n_walkers],
            log_probs: vec![Vec::new(); n_walkers],
            accepted: vec![0; n_walkers],
        }
    }

    pub(crate) fn push(&mut self, positions: &[Vec<f64>], log_probs: &[f64]) {
        for (walker, (position, log_prob)) in positions.iter().zip(log_probs).enumerate() {
            self.chain[walker].push(position.clone());
            self.log_probs[walker].push(*log_prob);
        }
    }

    pub fn chain(&self) -> &[Vec<Vec<f64>>] {
        &self.chain
    }

    pub fn log_probs(&self) -> &[Vec<f64>] {
        &self.log_probs
    }

    /// `(walkers, steps, parameters)`
    pub fn dimension(&self) -> (usize, usize, usize) {
        let n_steps = self.chain.first().map_or(0, Vec::len);
        let n_parameters = self
            .chain
            .first()
            .and_then(|walker| walker.first())
            .map_or(0, Vec::len);
        (self.chain.len(), n_steps, n_parameters)
    }

    pub fn n_steps(&self) -> usize {
        self.dimension().1
    }

    /// The most recent position of every walker.
    pub fn latest(&self) -> Vec<&[f64]> {
        self.chain
            .iter()
            .filter_map(|walker| walker.last().map(Vec::as_slice))
            .collect()
    }

    pub fn acceptance_fraction(&self) -> Vec<f64> {
        #[allow(clippy::cast_precision_loss)]
        let n_steps = self.n_steps().max(1) as f64;
        #[allow(clippy::cast_precision_loss)]
        let fractions = self.accepted.iter().map(|n| *n as f64 / n_steps).collect();
        fractions
    }

    /// Every walker's positions after discarding the first `discard` steps and keeping every
    /// `thin`-th step, concatenated walker by walker.
    pub fn flat_chain(&self, discard: usize, thin: usize) -> Vec<Vec<f64>> {
        self.chain
            .iter()
            .flat_map(|walker| walker.iter().skip(discard).step_by(thin.max(1)).cloned())
            .collect()
    }
}

/// Whether a sampler should keep going after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Continue,
    Halt,
}

/// Called synchronously after every completed step with the step number (counted from 1) and
/// the ensemble so far.
pub trait MCMCObserver {
    fn callback(&mut self, step: usize, ensemble: &Ensemble) -> Signal;
}

impl MCMCObserver for () {
    fn callback(&mut self, _step: usize, _ensemble: &Ensemble) -> Signal {
        Signal::Continue
    }
}

/// The affine-invariant ensemble sampler of Goodman and Weare with the stretch move.
///
/// The target density of a [`Function`] $`f`$ is $`p(x) \propto e^{-f(x)/2}`$, so an objective
/// of the form $`-2\ln\mathcal{L}`$ is sampled as the likelihood. Walkers are updated one at a
/// time, each against the current positions of the rest of the ensemble.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleSampler {
    /// Scale of the stretch move.
    pub a: f64,
}

impl Default for EnsembleSampler {
    fn default() -> Self {
        Self { a: 2.0 }
    }
}

fn log_density(function: &dyn Function, x: &[f64]) -> f64 {
    let value = -0.5 * function.call(x);
    if value.is_nan() {
        f64::NEG_INFINITY
    } else {
        value
    }
}

impl EnsembleSampler {
    /// Runs the chain for at most `max_steps` steps, stopping early when `observer` returns
    /// [`Signal::Halt`].
    ///
    /// # Errors
    ///
    /// Returns [`McmcError`] if fewer than two walkers are given or a walker's dimension does not
    /// match the function.
    pub fn run<R: Rng>(
        &self,
        function: &dyn Function,
        initial: Vec<Vec<f64>>,
        max_steps: usize,
        observer: &mut dyn MCMCObserver,
        rng: &mut R,
    ) -> Result<Ensemble, McmcError> {
        let n_walkers = initial.len();
        if n_walkers < 2 {
            return Err(McmcError::TooFewWalkers { n_walkers });
        }
        let n_dim = function.dimension();
        if let Some((walker, position)) = initial
            .iter()
            .enumerate()
            .find(|(_, position)| position.len() != n_dim)
        {
            return Err(McmcError::DimensionMismatch {
                walker,
                expected: n_dim,
                found: position.len(),
            });
        }
        let mut positions = initial;
        let mut log_probs: Vec<f64> = positions
            .iter()
            .map(|position| log_density(function, position))
            .collect();
        let mut ensemble = Ensemble::new(n_walkers);
        #[allow(clippy::cast_precision_loss)]
        let exponent = n_dim as f64 - 1.0;
        for step in 1..=max_steps {
            for k in 0..n_walkers {
                let mut j = rng.gen_range(0..n_walkers - 1);
                if j >= k {
                    j += 1;
                }
                let u: f64 = rng.gen();
                let z = ((self.a - 1.0) * u + 1.0).powi(2) / self.a;
                let proposal: Vec<f64> = positions[j]
                    .iter()
                    .zip(&positions[k])
                    .map(|(xj, xk)| xj + z * (xk - xj))
                    .collect();
                let proposal_log_prob = log_density(function, &proposal);
                let log_q = exponent * z.ln() + proposal_log_prob - log_probs[k];
                let r: f64 = rng.gen();
                if r.ln() < log_q {
                    positions[k] = proposal;
                    log_probs[k] = proposal_log_prob;
                    ensemble.accepted[k] += 1;
                }
            }
            ensemble.push(&positions, &log_probs);
            if observer.callback(step, &ensemble) == Signal::Halt {
                debug!("Sampler halted by observer after {step} steps");
                break;
            }
        }
        Ok(ensemble)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    /// $`-2\ln`$ of a standard normal density, up to a constant.
    struct StandardNormalNll {
        n: usize,
    }
    impl Function for StandardNormalNll {
        fn call(&self, x: &[f64]) -> f64 {
            x.iter().map(|xi| xi * xi).sum()
        }
        fn dimension(&self) -> usize {
            self.n
        }
    }

    struct HaltAt(usize);
    impl MCMCObserver for HaltAt {
        fn callback(&mut self, step: usize, _ensemble: &Ensemble) -> Signal {
            if step >= self.0 {
                Signal::Halt
            } else {
                Signal::Continue
            }
        }
    }

    fn initial(n_walkers: usize, n: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
        let normal = Normal::new(0.5, 0.1).unwrap();
        (0..n_walkers)
            .map(|_| (0..n).map(|_| normal.sample(rng)).collect())
            .collect()
    }

    #[test]
    fn samples_a_standard_normal() {
        let mut rng = StdRng::seed_from_u64(0);
        let p0 = initial(32, 2, &mut rng);
        let ensemble = EnsembleSampler::default()
            .run(&StandardNormalNll { n: 2 }, p0, 3000, &mut (), &mut rng)
            .unwrap();
        assert_eq!(ensemble.dimension(), (32, 3000, 2));
        let samples = ensemble.flat_chain(1000, 5);
        let n = samples.len() as f64;
        for i in 0..2 {
            let mean = samples.iter().map(|x| x[i]).sum::<f64>() / n;
            let var = samples.iter().map(|x| (x[i] - mean).powi(2)).sum::<f64>() / n;
            assert!(mean.abs() < 0.15, "mean = {mean}");
            assert!((var - 1.0).abs() < 0.25, "var = {var}");
        }
        assert!(ensemble
            .acceptance_fraction()
            .iter()
            .all(|f| (0.2..0.9).contains(f)));
    }

    #[test]
    fn halts_when_observer_asks() {
        let mut rng = StdRng::seed_from_u64(1);
        let p0 = initial(4, 3, &mut rng);
        let ensemble = EnsembleSampler::default()
            .run(&StandardNormalNll { n: 3 }, p0, 100, &mut HaltAt(10), &mut rng)
            .unwrap();
        assert_eq!(ensemble.dimension(), (4, 10, 3));
        assert_eq!(ensemble.latest().len(), 4);
    }

    #[test]
    fn runs_are_reproducible() {
        let run = || {
            let mut rng = StdRng::seed_from_u64(9);
            let p0 = initial(6, 2, &mut rng);
            EnsembleSampler::default()
                .run(&StandardNormalNll { n: 2 }, p0, 50, &mut (), &mut rng)
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn rejects_bad_ensembles() {
        let mut rng = StdRng::seed_from_u64(2);
        let sampler = EnsembleSampler::default();
        let f = StandardNormalNll { n: 2 };
        assert_eq!(
            sampler.run(&f, vec![vec![0.0, 0.0]], 10, &mut (), &mut rng),
            Err(McmcError::TooFewWalkers { n_walkers: 1 })
        );
        assert_eq!(
            sampler.run(&f, vec![vec![0.0, 0.0], vec![0.0]], 10, &mut (), &mut rng),
            Err(McmcError::DimensionMismatch {
                walker: 1,
                expected: 2,
                found: 1
            })
        );
    }
}
