use num_complex::Complex64;
use sphrs::{ComplexSH, Coordinates, SHEval};

use crate::amplitude::Node;
use crate::dataset::Event;
use crate::variable::{Angles, Polarization};
use crate::wave::{Reflectivity, Wave};

/// The complex spherical harmonic $`Y_{\ell}^{m}(\theta, \varphi)`$ of the analyzed daughter in
/// the helicity frame.
#[derive(Debug, Clone)]
pub struct Ylm {
    pub l: usize,
    pub m: isize,
    pub angles: Angles,
}

impl Node for Ylm {
    fn calculate(&self, _parameters: &[f64], event: &Event) -> Complex64 {
        let p = self.angles.frame(event).coordinates();
        #[allow(clippy::cast_possible_wrap)]
        let (l, m) = (self.l as i64, self.m as i64);
        ComplexSH::Spherical.eval(l, m, &Coordinates::cartesian(p.x, p.y, p.z))
    }
}

/// The polarized-photoproduction basis function $`Z_{\ell}^{m}`$ for a wave of definite
/// reflectivity.
///
/// ```math
/// Z_{\ell}^{m}(\theta, \varphi, \Phi) = Y_{\ell}^{m}(\theta, \varphi) e^{-i\Phi}
/// ```
///
/// and the reflectivity $`\epsilon`$ mixes in the polarization degree $`P_\gamma`$:
///
/// ```math
/// \epsilon = +1:\ \sqrt{1 + P_\gamma}\,\Re[Z] + i\sqrt{1 - P_\gamma}\,\Im[Z],\qquad
/// \epsilon = -1:\ \sqrt{1 - P_\gamma}\,\Re[Z] + i\sqrt{1 + P_\gamma}\,\Im[Z]
/// ```
#[derive(Debug, Clone)]
pub struct Zlm {
    wave: Wave,
    angles: Angles,
    polarization: Polarization,
}

impl Zlm {
    pub fn new(wave: Wave, angles: Angles, polarization: Polarization) -> Self {
        Self {
            wave,
            angles,
            polarization,
        }
    }
}

impl Node for Zlm {
    fn calculate(&self, _parameters: &[f64], event: &Event) -> Complex64 {
        let ylm = Ylm {
            l: self.wave.l(),
            m: self.wave.m(),
            angles: self.angles.clone(),
        }
        .calculate(&[], event);
        let (big_phi, pgamma) = self.polarization.angle_and_magnitude(event);
        let zlm = ylm * Complex64::cis(-big_phi);
        match self.wave.r() {
            Reflectivity::Positive => Complex64::new(
                (1.0 + pgamma).sqrt() * zlm.re,
                (1.0 - pgamma).sqrt() * zlm.im,
            ),
            Reflectivity::Negative => Complex64::new(
                (1.0 - pgamma).sqrt() * zlm.re,
                (1.0 + pgamma).sqrt() * zlm.im,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::four_momentum::FourMomentum;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use std::f64::consts::PI;

    fn event(eps: Vector3<f64>) -> Event {
        Event {
            p4s: vec![
                FourMomentum::new(8.5, 0.0, 0.0, 8.5),
                FourMomentum::new(1.1, 0.1, 0.3, 0.2),
                FourMomentum::new(3.2, -0.1, 0.3, 3.0),
                FourMomentum::new(5.6, 0.0, -0.6, 5.3),
            ],
            eps,
            weight: 1.0,
        }
    }

    fn zlm(wave: &str) -> Zlm {
        Zlm::new(
            wave.parse().unwrap(),
            Angles::new(0, [1], [2], [2, 3]),
            Polarization::new(0, [1]),
        )
    }

    #[test]
    fn s_wave_without_polarization_has_constant_modulus() {
        let value = zlm("0+0+").calculate(&[], &event(Vector3::zeros()));
        assert_relative_eq!(value.norm_sqr(), 1.0 / (4.0 * PI), epsilon = 1e-12);
    }

    #[test]
    fn reflectivities_agree_without_polarization() {
        let e = event(Vector3::zeros());
        for (pos, neg) in [("0+0+", "0+0-"), ("2+1+", "2+1-"), ("3-2+", "3-2-")] {
            assert_relative_eq!(
                zlm(pos).calculate(&[], &e),
                zlm(neg).calculate(&[], &e),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn reflectivities_swap_real_and_imaginary_scaling() {
        let e = event(Vector3::new(0.3, 0.2, 0.0));
        let pgamma = e.eps.norm();
        let pos = zlm("2+1+").calculate(&[], &e);
        let neg = zlm("2+1-").calculate(&[], &e);
        assert_relative_eq!(
            pos.re / (1.0 + pgamma).sqrt(),
            neg.re / (1.0 - pgamma).sqrt(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            pos.im / (1.0 - pgamma).sqrt(),
            neg.im / (1.0 + pgamma).sqrt(),
            epsilon = 1e-12
        );
    }
}
