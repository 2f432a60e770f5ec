//! Integrated autocorrelation times of ensemble chains.
//!
//! The normalized autocorrelation function of each walker's series is computed with an FFT,
//! averaged over walkers, and summed up to the automatic window of Sokal: the smallest lag
//! $`M`$ with $`M \geq c\,\hat{\tau}(M)`$ where
//! $`\hat{\tau}(M) = 1 + 2\sum_{t=1}^{M}\hat{\rho}(t)`$.
use num_complex::Complex64;
use rustfft::FftPlanner;

/// Normalized autocorrelation function of `series` for lags `0..series.len()`.
///
/// A constant series is uncorrelated by convention: its autocorrelation is one at lag zero and
/// zero elsewhere.
pub fn autocorrelation_function(series: &[f64]) -> Vec<f64> {
    let n = series.len();
    if n == 0 {
        return Vec::new();
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = series.iter().sum::<f64>() / n as f64;
    let size = 2 * n.next_power_of_two();
    let mut buffer: Vec<Complex64> = series
        .iter()
        .map(|x| Complex64::new(x - mean, 0.0))
        .chain(std::iter::repeat(Complex64::new(0.0, 0.0)))
        .take(size)
        .collect();
    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(size).process(&mut buffer);
    for value in &mut buffer {
        *value = Complex64::new(value.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(size).process(&mut buffer);
    let variance = buffer[0].re;
    if variance <= 0.0 || !variance.is_finite() {
        let mut acf = vec![0.0; n];
        acf[0] = 1.0;
        return acf;
    }
    buffer[..n].iter().map(|value| value.re / variance).collect()
}

/// Sokal's automatic windowing: the first lag `m` with `m >= c * taus[m]`.
fn auto_window(taus: &[f64], c: f64) -> usize {
    #[allow(clippy::cast_precision_loss)]
    let window = taus
        .iter()
        .enumerate()
        .position(|(m, tau)| m as f64 >= c * tau);
    window.unwrap_or(taus.len() - 1)
}

/// Integrated autocorrelation time of one variable given each walker's series.
pub fn integrated_time(walkers: &[Vec<f64>], c: f64) -> f64 {
    let Some(n_steps) = walkers.iter().map(Vec::len).min() else {
        return f64::NAN;
    };
    if n_steps == 0 {
        return f64::NAN;
    }
    let mut mean_acf = vec![0.0; n_steps];
    for series in walkers {
        for (total, rho) in mean_acf
            .iter_mut()
            .zip(autocorrelation_function(&series[..n_steps]))
        {
            *total += rho;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let n_walkers = walkers.len() as f64;
    let taus: Vec<f64> = mean_acf
        .iter()
        .scan(0.0, |cumulative, rho| {
            *cumulative += rho / n_walkers;
            Some(2.0 * *cumulative - 1.0)
        })
        .collect();
    taus[auto_window(&taus, c)]
}

/// Integrated autocorrelation time of every variable of a chain indexed as
/// `chain[walker][step][variable]`.
pub fn integrated_autocorrelation_times(chain: &[Vec<Vec<f64>>], c: f64) -> Vec<f64> {
    let n_variables = chain
        .first()
        .and_then(|walker| walker.first())
        .map_or(0, Vec::len);
    (0..n_variables)
        .map(|variable| {
            let walkers: Vec<Vec<f64>> = chain
                .iter()
                .map(|walker| walker.iter().map(|step| step[variable]).collect())
                .collect();
            integrated_time(&walkers, c)
        })
        .collect()
}

/// Estimates per-variable integrated autocorrelation times of a `[walker][step][variable]`
/// chain.
pub trait TauEstimator: Send {
    fn integrated_times(&mut self, chain: &[Vec<Vec<f64>>]) -> Vec<f64>;
}

/// The FFT-based estimator with Sokal windowing constant `c`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegratedAutocorrelation {
    pub c: f64,
}

impl Default for IntegratedAutocorrelation {
    fn default() -> Self {
        Self { c: 5.0 }
    }
}

impl TauEstimator for IntegratedAutocorrelation {
    fn integrated_times(&mut self, chain: &[Vec<Vec<f64>>]) -> Vec<f64> {
        integrated_autocorrelation_times(chain, self.c)
    }
}
