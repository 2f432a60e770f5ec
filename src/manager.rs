use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use num_complex::Complex64;
use num_traits::Zero;
use rayon::prelude::*;

use crate::amplitude::Amplitude;
use crate::dataset::Dataset;

type SumMap = IndexMap<String, IndexMap<String, Vec<usize>>>;

#[derive(Debug)]
struct RegisteredAmplitude {
    amplitude: Amplitude,
    parameter_indices: Vec<usize>,
}

/// An intensity model built from named amplitudes.
///
/// Amplitudes are registered into groups, and groups into sums. The intensity of an event is
///
/// ```math
/// I = \sum_{\text{sums}} \left|\sum_{\text{groups}} \prod_{\text{amplitudes}} A\right|^2
/// ```
///
/// so groups within a sum interfere while separate sums add incoherently. Free parameters are
/// shared by name: two amplitudes which declare a parameter with the same name read the same
/// entry of the parameter vector. Parameters are ordered by first registration.
#[derive(Debug, Default)]
pub struct Model {
    sums: SumMap,
    amplitudes: Vec<RegisteredAmplitude>,
    parameters: IndexSet<String>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `amplitude` to the group `group_name` of the sum `sum_name`, creating either if
    /// needed, and returns the amplitude's index.
    pub fn register(&mut self, sum_name: &str, group_name: &str, amplitude: Amplitude) -> usize {
        let id = self.amplitudes.len();
        let parameter_indices = amplitude
            .parameters()
            .into_iter()
            .map(|name| self.parameters.insert_full(name).0)
            .collect();
        self.amplitudes.push(RegisteredAmplitude {
            amplitude,
            parameter_indices,
        });
        self.sums
            .entry(sum_name.to_string())
            .or_default()
            .entry(group_name.to_string())
            .or_default()
            .push(id);
        id
    }

    /// Names of the free parameters in input order.
    pub fn parameters(&self) -> Vec<String> {
        self.parameters.iter().cloned().collect()
    }

    pub fn n_parameters(&self) -> usize {
        self.parameters.len()
    }

    pub fn n_amplitudes(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn sum_names(&self) -> Vec<String> {
        self.sums.keys().cloned().collect()
    }

    pub fn amplitude_names(&self) -> Vec<String> {
        self.amplitudes
            .iter()
            .map(|registered| registered.amplitude.name().to_string())
            .collect()
    }

    /// An activation mask with only the amplitudes named in `names` switched on.
    pub fn mask<S: AsRef<str>>(&self, names: &[S]) -> Vec<bool> {
        self.amplitudes
            .iter()
            .map(|registered| {
                names
                    .iter()
                    .any(|name| name.as_ref() == registered.amplitude.name())
            })
            .collect()
    }

    /// Every amplitude switched on.
    pub fn full_mask(&self) -> Vec<bool> {
        vec![true; self.amplitudes.len()]
    }

    /// The slice of the parameter vector each amplitude reads, in registration order.
    fn gather_parameters(&self, parameters: &[f64]) -> Vec<Vec<f64>> {
        self.amplitudes
            .iter()
            .map(|registered| {
                registered
                    .parameter_indices
                    .iter()
                    .map(|i| parameters[*i])
                    .collect()
            })
            .collect()
    }

    /// Combines per-amplitude values for one event into an intensity. Inactive amplitudes
    /// contribute zero to their group.
    pub fn intensity(&self, values: &[Complex64], active: &[bool]) -> f64 {
        self.sums
            .values()
            .map(|groups| {
                groups
                    .values()
                    .map(|ids| {
                        ids.iter()
                            .map(|id| {
                                if active[*id] {
                                    values[*id]
                                } else {
                                    Complex64::zero()
                                }
                            })
                            .product::<Complex64>()
                    })
                    .sum::<Complex64>()
                    .norm_sqr()
            })
            .sum()
    }
}

/// A [`Model`] bound to a [`Dataset`].
///
/// Amplitudes without free parameters are evaluated once for every event on construction and
/// read from the cache afterwards.
#[derive(Debug, Clone)]
pub struct Manager {
    model: Arc<Model>,
    dataset: Arc<Dataset>,
    cache: Vec<Vec<Option<Complex64>>>,
}

impl Manager {
    pub fn new(model: &Arc<Model>, dataset: &Arc<Dataset>) -> Self {
        let cache = dataset.par_map(|event| {
            model
                .amplitudes
                .iter()
                .map(|registered| {
                    if registered.amplitude.is_fixed() {
                        Some(registered.amplitude.compute(&[], event))
                    } else {
                        None
                    }
                })
                .collect()
        });
        Self {
            model: Arc::clone(model),
            dataset: Arc::clone(dataset),
            cache,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    /// The intensity of every event with all amplitudes active.
    pub fn compute(&self, parameters: &[f64]) -> Vec<f64> {
        self.compute_with_mask(parameters, &self.model.full_mask())
    }

    /// The intensity of every event with only the amplitudes flagged in `active` switched on.
    /// Results are returned in event order.
    pub fn compute_with_mask(&self, parameters: &[f64], active: &[bool]) -> Vec<f64> {
        let amplitude_parameters = self.model.gather_parameters(parameters);
        self.dataset
            .events
            .par_iter()
            .zip(self.cache.par_iter())
            .map(|(event, cached)| {
                let values: Vec<Complex64> = self
                    .model
                    .amplitudes
                    .iter()
                    .zip(cached)
                    .zip(&amplitude_parameters)
                    .map(|((registered, cached), pars)| {
                        cached.unwrap_or_else(|| registered.amplitude.compute(pars, event))
                    })
                    .collect();
                self.model.intensity(&values, active)
            })
            .collect()
    }

    /// A manager over a bootstrap resample of this manager's dataset, reusing cached values.
    pub fn bootstrap(&self, seed: u64) -> Self {
        let indices = self.dataset.bootstrap_indices(seed);
        let dataset = Dataset {
            events: indices
                .iter()
                .map(|i| Arc::clone(&self.dataset.events[*i]))
                .collect(),
        };
        Self {
            model: Arc::clone(&self.model),
            dataset: Arc::new(dataset),
            cache: indices.iter().map(|i| self.cache[*i].clone()).collect(),
        }
    }
}
