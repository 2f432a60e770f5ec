use argmin::core::{CostFunction, Error, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead as Simplex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{Function, Minimizer, MinimizerError, Status};

/// The Nelder-Mead downhill simplex method, run by [`argmin`].
///
/// The initial simplex perturbs each coordinate of the starting point by 5% (or by `0.00025`
/// for coordinates equal to zero). Iteration stops once the standard deviation of the objective
/// over the simplex vertices falls below `sd_tolerance`, which marks the [`Status`] as
/// converged, or after `max_iters` iterations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NelderMead {
    pub max_iters: usize,
    pub sd_tolerance: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            sd_tolerance: 1e-8,
        }
    }
}

/// A [`Function`] seen through `argmin`. NaN ranks as +∞ so it never wins a comparison.
struct Problem<'a> {
    function: &'a dyn Function,
}

impl CostFunction for Problem<'_> {
    type Param = Vec<f64>;
    type Output = f64;
    fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        let fx = self.function.call(x);
        Ok(if fx.is_nan() { f64::INFINITY } else { fx })
    }
}

fn solver_error(e: Error) -> MinimizerError {
    MinimizerError::Solver {
        reason: e.to_string(),
    }
}

impl NelderMead {
    fn initial_simplex(x0: &[f64]) -> Vec<Vec<f64>> {
        std::iter::once(x0.to_vec())
            .chain((0..x0.len()).map(|k| {
                let mut vertex = x0.to_vec();
                vertex[k] = if vertex[k] == 0.0 {
                    0.00025
                } else {
                    vertex[k] * 1.05
                };
                vertex
            }))
            .collect()
    }
}

impl Minimizer for NelderMead {
    fn minimize(&self, function: &dyn Function, x0: &[f64]) -> Result<Status, MinimizerError> {
        let n = function.dimension();
        if x0.len() != n {
            return Err(MinimizerError::DimensionMismatch {
                expected: n,
                found: x0.len(),
            });
        }
        let solver = Simplex::new(Self::initial_simplex(x0))
            .with_sd_tolerance(self.sd_tolerance)
            .map_err(solver_error)?;
        let result = Executor::new(Problem { function }, solver)
            .configure(|state| state.max_iters(self.max_iters as u64))
            .run()
            .map_err(solver_error)?;
        let state = result.state();
        #[allow(clippy::cast_possible_truncation)]
        let n_evals = state
            .get_func_counts()
            .get("cost_count")
            .copied()
            .unwrap_or_default() as usize;
        let fx = state.get_best_cost();
        let x = match state.get_best_param() {
            Some(x) if fx.is_finite() => x.clone(),
            _ => return Err(MinimizerError::NonFinite { fx, n_evals }),
        };
        let converged = matches!(
            state.get_termination_reason(),
            Some(TerminationReason::SolverConverged)
        );
        trace!(
            "Nelder-Mead stopped after {} iterations: f = {fx}, converged = {converged}",
            state.get_iter()
        );
        Ok(Status {
            x,
            fx,
            converged,
            n_evals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Quadratic {
        center: Vec<f64>,
    }
    impl Function for Quadratic {
        fn call(&self, x: &[f64]) -> f64 {
            x.iter()
                .zip(&self.center)
                .enumerate()
                .map(|(i, (x, c))| (i + 1) as f64 * (x - c).powi(2))
                .sum::<f64>()
                + 3.0
        }
        fn dimension(&self) -> usize {
            self.center.len()
        }
    }

    struct Rosenbrock;
    impl Function for Rosenbrock {
        fn call(&self, x: &[f64]) -> f64 {
            (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2)
        }
        fn dimension(&self) -> usize {
            2
        }
    }

    struct Broken;
    impl Function for Broken {
        fn call(&self, _x: &[f64]) -> f64 {
            f64::NAN
        }
        fn dimension(&self) -> usize {
            2
        }
    }

    #[test]
    fn initial_simplex_perturbs_one_coordinate_each() {
        assert_eq!(
            NelderMead::initial_simplex(&[2.0, 0.0]),
            [vec![2.0, 0.0], vec![2.1, 0.0], vec![2.0, 0.00025]]
        );
    }

    #[test]
    fn minimizes_a_quadratic() {
        let f = Quadratic {
            center: vec![1.0, -2.0, 0.5],
        };
        let status = NelderMead::default()
            .minimize(&f, &[10.0, 10.0, -10.0])
            .unwrap();
        assert!(status.converged);
        assert!(status.n_evals > 4);
        assert_relative_eq!(status.fx, 3.0, epsilon = 1e-5);
        for (x, c) in status.x.iter().zip(&f.center) {
            assert_relative_eq!(*x, *c, epsilon = 1e-2);
        }
    }

    #[test]
    fn minimizes_rosenbrock() {
        let nm = NelderMead {
            max_iters: 5000,
            sd_tolerance: 1e-14,
        };
        let status = nm.minimize(&Rosenbrock, &[-1.2, 1.0]).unwrap();
        assert_relative_eq!(status.x[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(status.x[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn iteration_cap_is_not_convergence() {
        let nm = NelderMead {
            max_iters: 3,
            sd_tolerance: 0.0,
        };
        let status = nm.minimize(&Rosenbrock, &[-1.2, 1.0]).unwrap();
        assert!(!status.converged);
        assert!(status.fx.is_finite());
    }

    #[test]
    fn non_finite_objective_is_an_error() {
        let nm = NelderMead {
            max_iters: 50,
            ..Default::default()
        };
        assert!(matches!(
            nm.minimize(&Broken, &[0.0, 0.0]),
            Err(MinimizerError::NonFinite { .. })
        ));
    }

    #[test]
    fn negative_tolerance_is_a_solver_error() {
        let nm = NelderMead {
            sd_tolerance: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            nm.minimize(&Rosenbrock, &[0.0, 0.0]),
            Err(MinimizerError::Solver { .. })
        ));
    }

    #[test]
    fn wrong_dimension_is_an_error() {
        assert_eq!(
            NelderMead::default().minimize(&Rosenbrock, &[0.0]),
            Err(MinimizerError::DimensionMismatch {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn minimization_is_deterministic() {
        let f = Quadratic {
            center: vec![0.3, 0.1],
        };
        let a = NelderMead::default().minimize(&f, &[5.0, -4.0]).unwrap();
        let b = NelderMead::default().minimize(&f, &[5.0, -4.0]).unwrap();
        assert_eq!(a, b);
    }
}
