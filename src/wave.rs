use std::fmt::Display;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amplitude::{Amplitude, ComplexScalar, Scalar};
use crate::gluex::Zlm;
use crate::manager::Model;
use crate::variable::{Angles, Polarization};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaveError {
    #[error("Invalid wave identifier {identifier:?}: {reason}")]
    ParseError { identifier: String, reason: String },
    #[error("|m| = {m} exceeds l = {l}")]
    ProjectionOutOfRange { l: usize, m: isize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("No waves were selected in either reflectivity sector")]
    NoWaves,
    #[error("The {reflectivity} reflectivity sector has waves but no anchor")]
    MissingAnchor { reflectivity: Reflectivity },
    #[error("Anchor index {anchor} is out of range for the {reflectivity} reflectivity sector with {len} waves")]
    AnchorOutOfRange {
        reflectivity: Reflectivity,
        anchor: usize,
        len: usize,
    },
    #[error("Wave {wave} was selected more than once")]
    DuplicateWave { wave: Wave },
    #[error("Wave {wave} does not belong to the {reflectivity} reflectivity sector")]
    ReflectivityMismatch {
        wave: Wave,
        reflectivity: Reflectivity,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Reflectivity {
    Positive,
    Negative,
}

impl Reflectivity {
    pub fn sign(&self) -> i8 {
        match self {
            Self::Positive => 1,
            Self::Negative => -1,
        }
    }
}

impl Display for Reflectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "+"),
            Self::Negative => write!(f, "-"),
        }
    }
}

/// A partial wave labelled by orbital angular momentum `l`, its projection `m`, and the
/// reflectivity `r`.
///
/// Waves are written as `{l}{m:+}{r}`, so the $`D`$-wave with $`m = +1`$ and positive
/// reflectivity is `"2+1+"` and the $`S`$-wave with negative reflectivity is `"0+0-"`.
///
/// ```
/// use zlmfit::prelude::*;
///
/// let wave: Wave = "2+1+".parse().unwrap();
/// assert_eq!(wave, Wave::new(2, 1, Reflectivity::Positive).unwrap());
/// assert_eq!(wave.to_string(), "2+1+");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Wave {
    l: usize,
    m: isize,
    r: Reflectivity,
}

impl Wave {
    pub fn new(l: usize, m: isize, r: Reflectivity) -> Result<Self, WaveError> {
        if m.unsigned_abs() > l {
            return Err(WaveError::ProjectionOutOfRange { l, m });
        }
        Ok(Self { l, m, r })
    }
    pub fn l(&self) -> usize {
        self.l
    }
    pub fn m(&self) -> isize {
        self.m
    }
    pub fn r(&self) -> Reflectivity {
        self.r
    }
    /// Name of the coefficient amplitude for this wave.
    pub fn coefficient_name(&self) -> String {
        self.to_string()
    }
    /// Name of the basis-function amplitude for this wave.
    pub fn basis_name(&self) -> String {
        format!("Z{self}")
    }
    pub fn real_parameter(&self) -> String {
        format!("{self} real")
    }
    pub fn imag_parameter(&self) -> String {
        format!("{self} imag")
    }
}

impl Display for Wave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{:+}{}", self.l, self.m, self.r)
    }
}

fn parse_sign(c: Option<char>, identifier: &str) -> Result<isize, WaveError> {
    match c {
        Some('+') => Ok(1),
        Some('-') => Ok(-1),
        _ => Err(WaveError::ParseError {
            identifier: identifier.to_string(),
            reason: "expected '+' or '-'".to_string(),
        }),
    }
}

impl FromStr for Wave {
    type Err = WaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_error = |reason: &str| WaveError::ParseError {
            identifier: s.to_string(),
            reason: reason.to_string(),
        };
        let mut chars = s.chars().peekable();
        let l_digits: String = chars.peeking_take_while(|c| c.is_ascii_digit()).collect();
        if l_digits.is_empty() {
            return Err(parse_error("missing l"));
        }
        let l: usize = l_digits
            .parse()
            .map_err(|_| parse_error("l is out of range"))?;
        let m_sign = parse_sign(chars.next(), s)?;
        let m_digits: String = chars.peeking_take_while(|c| c.is_ascii_digit()).collect();
        let m_abs: isize = if m_digits.is_empty() {
            1
        } else {
            m_digits
                .parse()
                .map_err(|_| parse_error("m is out of range"))?
        };
        let r = match parse_sign(chars.next(), s)? {
            1 => Reflectivity::Positive,
            _ => Reflectivity::Negative,
        };
        if chars.next().is_some() {
            return Err(parse_error("trailing characters"));
        }
        Wave::new(l, m_sign * m_abs, r)
    }
}

impl TryFrom<String> for Wave {
    type Error = WaveError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Wave> for String {
    fn from(value: Wave) -> Self {
        value.to_string()
    }
}

/// Validates one reflectivity sector and returns its anchor index, or `None` for an empty
/// sector.
fn validate_sector(
    waves: &[Wave],
    anchor: Option<usize>,
    reflectivity: Reflectivity,
) -> Result<Option<usize>, ModelError> {
    if let Some(wave) = waves.iter().find(|wave| wave.r != reflectivity) {
        return Err(ModelError::ReflectivityMismatch {
            wave: *wave,
            reflectivity,
        });
    }
    if let Some(wave) = waves.iter().duplicates().next() {
        return Err(ModelError::DuplicateWave { wave: *wave });
    }
    match (waves.is_empty(), anchor) {
        (true, None) => Ok(None),
        (false, None) => Err(ModelError::MissingAnchor { reflectivity }),
        (_, Some(anchor)) if anchor >= waves.len() => Err(ModelError::AnchorOutOfRange {
            reflectivity,
            anchor,
            len: waves.len(),
        }),
        (_, Some(anchor)) => Ok(Some(anchor)),
    }
}

/// Particles every event needs under the model's angular convention: the beam, the recoil and
/// the two resonance daughters.
pub const MODEL_PARTICLES: usize = 4;

/// Builds the intensity model for a selection of waves in each reflectivity sector.
///
/// Every wave contributes the product of a coefficient and a [`Zlm`] basis function to the
/// coherent sum of its sector. The coefficient of the anchor wave is real, fixing the phase
/// of that sector, while every other coefficient is complex. The sectors are summed
/// incoherently:
///
/// ```math
/// I = \left|\sum_{i \in +} c_i Z_i^{+}\right|^2 + \left|\sum_{j \in -} c_j Z_j^{-}\right|^2
/// ```
///
/// Either sector may be empty, but not both.
///
/// # Errors
///
/// Returns a [`ModelError`] if the selection is inconsistent: an anchor is missing or out of
/// range, a wave is repeated, a wave sits in the wrong sector, or no waves are selected.
pub fn build_model(
    pos_waves: &[Wave],
    pos_anchor: Option<usize>,
    neg_waves: &[Wave],
    neg_anchor: Option<usize>,
) -> Result<Model, ModelError> {
    let pos_anchor = validate_sector(pos_waves, pos_anchor, Reflectivity::Positive)?;
    let neg_anchor = validate_sector(neg_waves, neg_anchor, Reflectivity::Negative)?;
    if pos_anchor.is_none() && neg_anchor.is_none() {
        return Err(ModelError::NoWaves);
    }
    let angles = Angles::new(0, [1], [2], [2, 3]);
    let polarization = Polarization::new(0, [1]);
    let mut model = Model::default();
    for (sum_name, waves, anchor) in [
        ("PositiveReflectivity", pos_waves, pos_anchor),
        ("NegativeReflectivity", neg_waves, neg_anchor),
    ] {
        let Some(anchor) = anchor else {
            continue;
        };
        for (i, wave) in waves.iter().enumerate() {
            let coefficient = if i == anchor {
                Amplitude::new(&wave.coefficient_name(), Scalar::new(&wave.real_parameter()))
            } else {
                Amplitude::new(
                    &wave.coefficient_name(),
                    ComplexScalar::new(&wave.real_parameter(), &wave.imag_parameter()),
                )
            };
            let zlm = Amplitude::new(
                &wave.basis_name(),
                Zlm::new(*wave, angles.clone(), polarization.clone()),
            );
            let group_name = wave.to_string();
            model.register(sum_name, &group_name, coefficient);
            model.register(sum_name, &group_name, zlm);
        }
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn wave(s: &str) -> Wave {
        s.parse().unwrap()
    }

    #[test]
    fn parse_examples() {
        assert_eq!(
            wave("2+1+"),
            Wave::new(2, 1, Reflectivity::Positive).unwrap()
        );
        assert_eq!(
            wave("0+0+"),
            Wave::new(0, 0, Reflectivity::Positive).unwrap()
        );
        assert_eq!(
            wave("3-2-"),
            Wave::new(3, -2, Reflectivity::Negative).unwrap()
        );
        assert_eq!(
            wave("1-+"),
            Wave::new(1, -1, Reflectivity::Positive).unwrap()
        );
        assert_eq!(
            wave("12+10-"),
            Wave::new(12, 10, Reflectivity::Negative).unwrap()
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["", "+0+", "2", "2+1", "2*1+", "2+1+x", "1+2+", "a+0+", "2+1++"] {
            assert!(bad.parse::<Wave>().is_err(), "{bad:?} should not parse");
        }
        assert_eq!(
            "1+2+".parse::<Wave>(),
            Err(WaveError::ProjectionOutOfRange { l: 1, m: 2 })
        );
    }

    #[test]
    fn zero_projection_formats_with_plus() {
        assert_eq!(
            Wave::new(0, 0, Reflectivity::Negative).unwrap().to_string(),
            "0+0-"
        );
    }

    proptest! {
        #[test]
        fn format_then_parse_is_identity(l in 0usize..40, m_frac in -1.0f64..=1.0, positive: bool) {
            let m = (m_frac * l as f64).round() as isize;
            let r = if positive { Reflectivity::Positive } else { Reflectivity::Negative };
            let wave = Wave::new(l, m, r).unwrap();
            prop_assert_eq!(wave.to_string().parse::<Wave>().unwrap(), wave);
        }
    }

    #[test]
    fn single_wave_has_one_parameter() {
        let model = build_model(&[wave("0+0+")], Some(0), &[], None).unwrap();
        assert_eq!(model.parameters(), ["0+0+ real"]);
    }

    #[test]
    fn anchor_plus_complex_wave_has_three_parameters() {
        let model = build_model(&[wave("0+0+"), wave("2+2+")], Some(0), &[], None).unwrap();
        assert_eq!(
            model.parameters(),
            ["0+0+ real", "2+2+ real", "2+2+ imag"]
        );
    }

    #[test]
    fn anchor_need_not_be_first() {
        let model = build_model(&[wave("0+0+"), wave("2+2+")], Some(1), &[], None).unwrap();
        assert_eq!(
            model.parameters(),
            ["0+0+ real", "0+0+ imag", "2+2+ real"]
        );
    }

    #[test]
    fn negative_only_sector_is_supported() {
        let model = build_model(&[], None, &[wave("0+0-"), wave("1+1-")], Some(0)).unwrap();
        assert_eq!(model.n_parameters(), 3);
        assert_eq!(model.sum_names(), ["NegativeReflectivity"]);
    }

    #[test]
    fn both_sectors() {
        let model = build_model(
            &[wave("0+0+"), wave("1+1+")],
            Some(1),
            &[wave("0+0-")],
            Some(0),
        )
        .unwrap();
        assert_eq!(model.n_parameters(), 4);
        assert_eq!(
            model.sum_names(),
            ["PositiveReflectivity", "NegativeReflectivity"]
        );
    }

    #[test]
    fn anchor_out_of_range() {
        assert_eq!(
            build_model(&[wave("0+0+")], Some(1), &[], None).unwrap_err(),
            ModelError::AnchorOutOfRange {
                reflectivity: Reflectivity::Positive,
                anchor: 1,
                len: 1
            }
        );
        assert!(matches!(
            build_model(&[wave("0+0+")], Some(0), &[], Some(0)),
            Err(ModelError::AnchorOutOfRange {
                reflectivity: Reflectivity::Negative,
                ..
            })
        ));
    }

    #[test]
    fn inconsistent_selections() {
        assert_eq!(
            build_model(&[], None, &[], None).unwrap_err(),
            ModelError::NoWaves
        );
        assert_eq!(
            build_model(&[], None, &[wave("0+0-")], None).unwrap_err(),
            ModelError::MissingAnchor {
                reflectivity: Reflectivity::Negative
            }
        );
        assert_eq!(
            build_model(&[wave("0+0+"), wave("0+0+")], Some(0), &[], None).unwrap_err(),
            ModelError::DuplicateWave {
                wave: wave("0+0+")
            }
        );
        assert_eq!(
            build_model(&[wave("0+0-")], Some(0), &[], None).unwrap_err(),
            ModelError::ReflectivityMismatch {
                wave: wave("0+0-"),
                reflectivity: Reflectivity::Positive
            }
        );
    }
}
