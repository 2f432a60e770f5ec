use std::sync::Arc;

use argmin::core::{CostFunction, Error};

use crate::dataset::Dataset;
use crate::fit::Function;
use crate::manager::{Manager, Model};

/// The extended maximum-likelihood objective of a [`Model`] over a data sample and an accepted
/// Monte Carlo sample.
///
/// ```math
/// -2\ln\mathcal{L} = -2\left(\sum_{i \in \text{data}} w_i \ln I(x_i)
///     - \frac{N_{\text{data}}}{N_{\text{MC}}} \sum_{j \in \text{MC}} w_j I(x_j)\right)
/// ```
///
/// where $`N`$ is the sum of weights of each sample. Per-event intensities are evaluated in
/// parallel and summed in event order, so repeated evaluations are bit-identical.
#[derive(Debug, Clone)]
pub struct ExtendedLogLikelihood {
    data: Arc<Manager>,
    accmc: Arc<Manager>,
}

impl ExtendedLogLikelihood {
    pub fn new(model: &Arc<Model>, data: &Arc<Dataset>, accmc: &Arc<Dataset>) -> Self {
        Self {
            data: Arc::new(Manager::new(model, data)),
            accmc: Arc::new(Manager::new(model, accmc)),
        }
    }

    /// The same objective with the data replaced by a bootstrap resample. The accepted Monte
    /// Carlo is shared with `self`.
    pub fn bootstrap(&self, seed: u64) -> Self {
        Self {
            data: Arc::new(self.data.bootstrap(seed)),
            accmc: Arc::clone(&self.accmc),
        }
    }

    pub fn data(&self) -> &Manager {
        &self.data
    }

    pub fn accmc(&self) -> &Manager {
        &self.accmc
    }

    pub fn model(&self) -> &Arc<Model> {
        self.data.model()
    }

    pub fn parameters(&self) -> Vec<String> {
        self.model().parameters()
    }

    pub fn n_free(&self) -> usize {
        self.model().n_parameters()
    }

    pub fn evaluate(&self, parameters: &[f64]) -> f64 {
        let data_result: f64 = self
            .data
            .compute(parameters)
            .iter()
            .zip(self.data.dataset().iter())
            .map(|(intensity, event)| event.weight * intensity.ln())
            .sum();
        let mc_result: f64 = self
            .accmc
            .compute(parameters)
            .iter()
            .zip(self.accmc.dataset().iter())
            .map(|(intensity, event)| event.weight * intensity)
            .sum();
        let n_data = self.data.dataset().weighted_len();
        let n_mc = self.accmc.dataset().weighted_len();
        -2.0 * (data_result - (n_data / n_mc) * mc_result)
    }

    /// Per-event weights of the accepted Monte Carlo which reproduce the fitted intensity,
    /// normalized by the Monte Carlo yield.
    pub fn project(&self, parameters: &[f64]) -> Vec<f64> {
        self.project_with_mask(parameters, &self.model().full_mask())
    }

    /// Like [`ExtendedLogLikelihood::project`] with only the named amplitudes active.
    pub fn project_with<S: AsRef<str>>(&self, parameters: &[f64], names: &[S]) -> Vec<f64> {
        self.project_with_mask(parameters, &self.model().mask(names))
    }

    pub fn project_with_mask(&self, parameters: &[f64], active: &[bool]) -> Vec<f64> {
        let n_mc = self.accmc.dataset().weighted_len();
        self.accmc
            .compute_with_mask(parameters, active)
            .iter()
            .zip(self.accmc.dataset().iter())
            .map(|(intensity, event)| event.weight * intensity / n_mc)
            .collect()
    }
}

impl Function for ExtendedLogLikelihood {
    fn call(&self, x: &[f64]) -> f64 {
        self.evaluate(x)
    }
    fn dimension(&self) -> usize {
        self.n_free()
    }
}

impl CostFunction for ExtendedLogLikelihood {
    type Param = Vec<f64>;
    type Output = f64;
    fn cost(&self, params: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.evaluate(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amplitude::{Amplitude, Scalar};
    use crate::dataset::Event;
    use approx::assert_relative_eq;

    fn sample(weights: &[f64]) -> Arc<Dataset> {
        Arc::new(
            weights
                .iter()
                .map(|w| Event {
                    weight: *w,
                    ..Default::default()
                })
                .collect(),
        )
    }

    fn constant_model() -> Arc<Model> {
        let mut model = Model::new();
        model.register("S", "G", Amplitude::new("c", Scalar::new("c")));
        Arc::new(model)
    }

    #[test]
    fn constant_intensity_matches_closed_form() {
        let data = sample(&[1.0, 1.0, 0.5]);
        let accmc = sample(&[1.0; 4]);
        let nll = ExtendedLogLikelihood::new(&constant_model(), &data, &accmc);
        let c: f64 = 1.5;
        let intensity = c * c;
        let expected = -2.0 * (2.5 * intensity.ln() - (2.5 / 4.0) * 4.0 * intensity);
        assert_relative_eq!(nll.evaluate(&[c]), expected, epsilon = 1e-12);
        assert_eq!(nll.dimension(), 1);
    }

    #[test]
    fn constant_intensity_is_minimized_at_unit_intensity() {
        let data = sample(&[1.0; 10]);
        let accmc = sample(&[1.0; 20]);
        let nll = ExtendedLogLikelihood::new(&constant_model(), &data, &accmc);
        let at_min = nll.evaluate(&[1.0]);
        assert!(nll.evaluate(&[1.1]) > at_min);
        assert!(nll.evaluate(&[0.9]) > at_min);
    }

    #[test]
    fn projection_sums_to_mean_intensity() {
        let data = sample(&[1.0]);
        let accmc = sample(&[1.0, 1.0]);
        let nll = ExtendedLogLikelihood::new(&constant_model(), &data, &accmc);
        let projection: f64 = nll.project(&[2.0]).iter().sum();
        assert_relative_eq!(projection, 4.0, epsilon = 1e-12);
        let masked: f64 = nll.project_with(&[2.0], &["missing"]).iter().sum();
        assert_eq!(masked, 0.0);
    }

    #[test]
    fn argmin_finds_unit_intensity() {
        use argmin::core::{Executor, State};
        use argmin::solver::neldermead::NelderMead;

        let data = sample(&[1.0; 10]);
        let accmc = sample(&[1.0; 20]);
        let nll = ExtendedLogLikelihood::new(&constant_model(), &data, &accmc);
        assert_eq!(nll.cost(&vec![0.8]).unwrap(), nll.evaluate(&[0.8]));
        let solver = NelderMead::new(vec![vec![0.5], vec![2.0]])
            .with_sd_tolerance(1e-12)
            .unwrap();
        let result = Executor::new(nll, solver)
            .configure(|state| state.max_iters(500))
            .run()
            .unwrap();
        let best = result.state().get_best_param().unwrap();
        assert_relative_eq!(best[0].abs(), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn evaluation_is_reproducible() {
        let data = sample(&[0.3, 1.7, 2.2, 0.9]);
        let accmc = sample(&[1.1, 0.4, 0.8]);
        let nll = ExtendedLogLikelihood::new(&constant_model(), &data, &accmc);
        assert_eq!(nll.evaluate(&[0.7]).to_bits(), nll.evaluate(&[0.7]).to_bits());
        let boot = nll.bootstrap(5);
        assert_eq!(boot.data().dataset().len(), 4);
        assert_eq!(boot.evaluate(&[0.7]).to_bits(), nll.bootstrap(5).evaluate(&[0.7]).to_bits());
    }
}
