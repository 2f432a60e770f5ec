use nalgebra::Vector3;

use crate::dataset::{Dataset, Event};
use crate::four_momentum::FourMomentum;

/// A scalar kinematic quantity computed from a single [`Event`].
pub trait Variable: Sync + Send {
    fn value(&self, event: &Event) -> f64;

    /// Evaluates the variable over every event in parallel, in event order.
    fn value_on(&self, dataset: &Dataset) -> Vec<f64> {
        dataset.par_map(|event| self.value(event))
    }
}

/// Invariant mass of the sum of a set of particles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mass {
    constituents: Vec<usize>,
}

impl Mass {
    pub fn new<I: IntoIterator<Item = usize>>(constituents: I) -> Self {
        Self {
            constituents: constituents.into_iter().collect(),
        }
    }
}

impl Variable for Mass {
    fn value(&self, event: &Event) -> f64 {
        event.sum_of(&self.constituents).m()
    }
}

/// Total four-momentum of the final state (every particle except the beam).
fn final_state_frame(event: &Event, beam: usize) -> FourMomentum {
    event
        .p4s
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != beam)
        .map(|(_, p4)| p4)
        .sum()
}

/// Coordinate axes of the helicity frame together with the momentum of the analyzed daughter.
///
/// The frame is the rest frame of the resonance reached from the center-of-momentum frame of the
/// final state. Its $`z`$-axis points opposite the recoil, its $`y`$-axis is normal to the
/// production plane ($`\hat{y} \propto \vec{p}_{\text{beam}} \times (-\vec{p}_{\text{recoil}})`$
/// in the center-of-momentum frame) and $`\hat{x} = \hat{y} \times \hat{z}`$.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HelicityFrame {
    pub x: Vector3<f64>,
    pub y: Vector3<f64>,
    pub z: Vector3<f64>,
    pub daughter: Vector3<f64>,
}

impl HelicityFrame {
    /// The daughter momentum projected onto the frame axes.
    pub fn coordinates(&self) -> Vector3<f64> {
        Vector3::new(
            self.daughter.dot(&self.x),
            self.daughter.dot(&self.y),
            self.daughter.dot(&self.z),
        )
    }
    pub fn costheta(&self) -> f64 {
        self.daughter.dot(&self.z) / self.daughter.norm()
    }
    pub fn phi(&self) -> f64 {
        self.daughter.dot(&self.y).atan2(self.daughter.dot(&self.x))
    }
}

/// Decay angles of a daughter particle in the helicity frame of a resonance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Angles {
    beam: usize,
    recoil: Vec<usize>,
    daughter: Vec<usize>,
    resonance: Vec<usize>,
}

impl Angles {
    pub fn new<R, D, X>(beam: usize, recoil: R, daughter: D, resonance: X) -> Self
    where
        R: IntoIterator<Item = usize>,
        D: IntoIterator<Item = usize>,
        X: IntoIterator<Item = usize>,
    {
        Self {
            beam,
            recoil: recoil.into_iter().collect(),
            daughter: daughter.into_iter().collect(),
            resonance: resonance.into_iter().collect(),
        }
    }

    pub fn frame(&self, event: &Event) -> HelicityFrame {
        let cm = final_state_frame(event, self.beam);
        let beam = event.p4s[self.beam].boost_along(&cm);
        let recoil = event.sum_of(&self.recoil).boost_along(&cm);
        let resonance = event.sum_of(&self.resonance).boost_along(&cm);
        let daughter = event.sum_of(&self.daughter).boost_along(&cm);

        let recoil_res = recoil.boost_along(&resonance);
        let daughter_res = daughter.boost_along(&resonance);

        let z = -recoil_res.momentum().normalize();
        let y = beam
            .momentum()
            .cross(&(-recoil.momentum()))
            .normalize();
        let x = y.cross(&z);
        HelicityFrame {
            x,
            y,
            z,
            daughter: daughter_res.momentum(),
        }
    }
}

/// Cosine of the helicity-frame polar angle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosTheta(pub Angles);

impl Variable for CosTheta {
    fn value(&self, event: &Event) -> f64 {
        self.0.frame(event).costheta()
    }
}

/// Helicity-frame azimuthal angle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi(pub Angles);

impl Variable for Phi {
    fn value(&self, event: &Event) -> f64 {
        self.0.frame(event).phi()
    }
}

/// Beam polarization angle $`\Phi`$ relative to the production plane and polarization
/// magnitude $`P_\gamma = |\vec{\epsilon}|`$.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polarization {
    beam: usize,
    recoil: Vec<usize>,
}

impl Polarization {
    pub fn new<R: IntoIterator<Item = usize>>(beam: usize, recoil: R) -> Self {
        Self {
            beam,
            recoil: recoil.into_iter().collect(),
        }
    }

    /// Returns $`(\Phi, P_\gamma)`$.
    pub fn angle_and_magnitude(&self, event: &Event) -> (f64, f64) {
        let cm = final_state_frame(event, self.beam);
        let beam = event.p4s[self.beam].boost_along(&cm);
        let recoil = event.sum_of(&self.recoil).boost_along(&cm);
        let y = beam
            .momentum()
            .cross(&(-recoil.momentum()))
            .normalize();
        let eps = event.eps;
        let big_phi = y
            .dot(&eps)
            .atan2(beam.momentum().normalize().dot(&eps.cross(&y)));
        (big_phi, eps.norm())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolAngle(pub Polarization);

impl Variable for PolAngle {
    fn value(&self, event: &Event) -> f64 {
        self.0.angle_and_magnitude(event).0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolMagnitude(pub Polarization);

impl Variable for PolMagnitude {
    fn value(&self, event: &Event) -> f64 {
        self.0.angle_and_magnitude(event).1
    }
}
