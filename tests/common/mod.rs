use std::f64::consts::PI;
use std::sync::Arc;

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zlmfit::prelude::*;

pub const BEAM_ENERGY: f64 = 8.5;
pub const PROTON_MASS: f64 = 0.938_272;
pub const KAON_MASS: f64 = 0.497_611;

/// Phase-space events `beam, proton, K, K` with the K-K invariant mass uniform in `range`, an
/// isotropic decay, and a 35% linearly polarized beam at a random angle.
pub fn generate(n_events: usize, range: (f64, f64), seed: u64) -> Arc<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let beam = FourMomentum::new(BEAM_ENERGY, 0.0, 0.0, BEAM_ENERGY);
    let events = (0..n_events)
        .map(|_| {
            let mass = rng.gen_range(range.0..range.1);
            let recoil_momentum = Vector3::new(
                rng.gen_range(-0.3..0.3),
                rng.gen_range(-0.3..0.3),
                rng.gen_range(0.2..0.6),
            );
            let recoil = FourMomentum::from_momentum(&recoil_momentum, PROTON_MASS);
            let resonance_momentum = beam.momentum() - recoil_momentum;
            let resonance = FourMomentum::from_momentum(&resonance_momentum, mass);

            let costheta: f64 = rng.gen_range(-1.0..1.0);
            let phi = rng.gen_range(-PI..PI);
            let sintheta = (1.0 - costheta * costheta).sqrt();
            let q = (mass * mass / 4.0 - KAON_MASS * KAON_MASS).sqrt();
            let k = Vector3::new(sintheta * phi.cos(), sintheta * phi.sin(), costheta) * q;
            let to_lab = -resonance.beta3();
            let k1 = FourMomentum::from_momentum(&k, KAON_MASS).boost(&to_lab);
            let k2 = FourMomentum::from_momentum(&(-k), KAON_MASS).boost(&to_lab);

            let pol_angle = rng.gen_range(-PI..PI);
            Event {
                p4s: vec![beam, recoil, k1, k2],
                eps: Vector3::new(0.35 * pol_angle.cos(), 0.35 * pol_angle.sin(), 0.0),
                weight: 1.0,
            }
        })
        .collect();
    Arc::new(Dataset::new(events))
}

/// An unpolarized copy of `dataset`.
pub fn depolarize(dataset: &Dataset) -> Arc<Dataset> {
    Arc::new(
        dataset
            .iter()
            .map(|event| Event {
                eps: Vector3::zeros(),
                ..event.clone()
            })
            .collect(),
    )
}

pub fn small_config(toml: &str) -> FitConfig {
    FitConfig::from_toml(toml).unwrap()
}
