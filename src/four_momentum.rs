use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FourMomentum {
    pub e: f64,
    pub px: f64,
    pub py: f64,
    pub pz: f64,
}

impl FourMomentum {
    //! A four-momentum structure with helpful methods for boosts.
    //!
    //! This is the basic structure of a Lorentz four-vector
    //! of the form $`(E, \overrightarrow{p})`$ where $E$ is the energy and $`\overrightarrow{p}`$ is the
    //! momentum.
    //!
    //! # Examples
    //! ```
    //! use zlmfit::prelude::*;
    //!
    //! let vec_a = FourMomentum::new(1.3, 0.2, 0.3, 0.1);
    //! let vec_b = FourMomentum::new(4.2, 0.5, 0.4, 0.5);
    //! assert_eq!((vec_a + vec_b).e, 1.3 + 4.2);
    //! ```

    pub fn new(e: f64, px: f64, py: f64, pz: f64) -> Self {
        //! Create a new [`FourMomentum`] from energy and momentum components.
        //!
        //! Components are listed in the order $` (E, p_x, p_y, p_z) `$
        Self { e, px, py, pz }
    }

    pub fn from_momentum(momentum: &Vector3<f64>, mass: f64) -> Self {
        //! Create an on-shell [`FourMomentum`] from a 3-momentum and a mass.
        let e = (momentum.norm_squared() + mass * mass).sqrt();
        Self::new(e, momentum.x, momentum.y, momentum.z)
    }

    pub fn momentum(&self) -> Vector3<f64> {
        //! Extract the 3-momentum as a [`nalgebra::Vector3<f64>`]
        Vector3::new(self.px, self.py, self.pz)
    }

    pub fn m2(&self) -> f64 {
        //! Calculate the invariant $ m^2 $ for this [`FourMomentum`] instance.
        //!
        //! Calculates $` m^2 = E^2 - \overrightarrow{p}^2 `$
        self.e.powi(2) - self.px.powi(2) - self.py.powi(2) - self.pz.powi(2)
    }

    pub fn m(&self) -> f64 {
        //! Calculate the invariant $ m $ for this [`FourMomentum`] instance.
        //!
        //! # See Also:
        //!
        //! [`FourMomentum::m2`]
        self.m2().sqrt()
    }

    pub fn beta3(&self) -> Vector3<f64> {
        //! Construct the 3-vector $\overrightarrow{\beta}$ where
        //!
        //! $` \overrightarrow{\beta} = \frac{\overrightarrow{p}}{E} `$
        self.momentum() / self.e
    }

    pub fn boost(&self, beta: &Vector3<f64>) -> Self {
        //! Apply the Lorentz boost $`\mathbf{\Lambda}(\overrightarrow{\beta})`$ which takes the lab
        //! frame to a frame moving with velocity $`\overrightarrow{\beta}`$.
        //!
        //! ```math
        //! E' = \gamma (E - \overrightarrow{\beta}\cdot\overrightarrow{p}),\quad
        //! \overrightarrow{p}' = \overrightarrow{p} + \left(\frac{(\gamma - 1)\,\overrightarrow{\beta}\cdot\overrightarrow{p}}{\beta^2} - \gamma E\right)\overrightarrow{\beta}
        //! ```
        let b2 = beta.norm_squared();
        if b2 == 0.0 {
            return *self;
        }
        let gamma = 1.0 / (1.0 - b2).sqrt();
        let p = self.momentum();
        let bp = beta.dot(&p);
        let p_boosted = p + beta * ((gamma - 1.0) * bp / b2 - gamma * self.e);
        Self::new(
            gamma * (self.e - bp),
            p_boosted.x,
            p_boosted.y,
            p_boosted.z,
        )
    }

    pub fn boost_along(&self, other: &Self) -> Self {
        //! Boosts an instance of [`FourMomentum`] into the rest frame of another
        //! [`FourMomentum`].
        //!
        //! # Examples
        //! ```
        //! use zlmfit::prelude::*;
        //!
        //! let vec_a = FourMomentum::new(20.0, 1.0, 1.2, -3.4);
        //! let vec_a_rest = vec_a.boost_along(&vec_a);
        //! assert!(vec_a_rest.momentum().norm() < 1e-12);
        //! assert!((vec_a_rest.e - vec_a.m()).abs() < 1e-12);
        //! ```
        self.boost(&other.beta3())
    }
}

impl Add for FourMomentum {
    type Output = FourMomentum;
    fn add(self, rhs: Self) -> Self::Output {
        Self {
            e: self.e + rhs.e,
            px: self.px + rhs.px,
            py: self.py + rhs.py,
            pz: self.pz + rhs.pz,
        }
    }
}

impl<'a, 'b> Add<&'b FourMomentum> for &'a FourMomentum {
    type Output = FourMomentum;
    fn add(self, rhs: &'b FourMomentum) -> Self::Output {
        *self + *rhs
    }
}

impl Sub for FourMomentum {
    type Output = FourMomentum;
    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            e: self.e - rhs.e,
            px: self.px - rhs.px,
            py: self.py - rhs.py,
            pz: self.pz - rhs.pz,
        }
    }
}

impl<'a> std::iter::Sum<&'a FourMomentum> for FourMomentum {
    fn sum<I: Iterator<Item = &'a FourMomentum>>(iter: I) -> Self {
        iter.fold(FourMomentum::default(), |a, b| a + *b)
    }
}

impl std::iter::Sum<FourMomentum> for FourMomentum {
    fn sum<I: Iterator<Item = FourMomentum>>(iter: I) -> Self {
        iter.fold(FourMomentum::default(), |a, b| a + b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn invariant_mass_is_boost_invariant() {
        let p = FourMomentum::new(5.0, 1.0, -2.0, 3.0);
        let frame = FourMomentum::new(10.0, 0.5, 4.0, -1.0);
        let boosted = p.boost_along(&frame);
        assert_relative_eq!(boosted.m2(), p.m2(), epsilon = 1e-10);
    }

    #[test]
    fn boost_into_own_rest_frame() {
        let p = FourMomentum::from_momentum(&Vector3::new(0.3, -0.7, 2.1), 0.938);
        let rest = p.boost_along(&p);
        assert_relative_eq!(rest.e, 0.938, epsilon = 1e-10);
        assert_relative_eq!(rest.momentum().norm(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn sum_of_momenta() {
        let ps = [
            FourMomentum::new(1.0, 0.125, 0.25, 0.25),
            FourMomentum::new(2.0, -0.125, 0.0, 0.5),
        ];
        let total: FourMomentum = ps.iter().sum();
        assert_eq!(total, FourMomentum::new(3.0, 0.0, 0.25, 0.75));
    }
}
