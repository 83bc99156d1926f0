//! Transfer-matrix cascade of a single structural period.
//!
//! A unit cell's 2x2 scattering matrix is converted to transfer form, raised
//! to the period count and converted back, independently at every frequency
//! sample. Near-singular conversions are replaced by the identity and
//! counted instead of dividing by (almost) zero.

use std::ops::Mul;

use log::warn;
use num_complex::Complex64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{Excitation, PeriodRounding};

/// Magnitude below which `S21` / `T22` are treated as zero.
pub const DEGENERACY_EPSILON: f64 = 1e-12;

/// 2x2 complex matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix2 {
    pub m11: Complex64,
    pub m12: Complex64,
    pub m21: Complex64,
    pub m22: Complex64,
}

impl Matrix2 {
    pub const fn new(m11: Complex64, m12: Complex64, m21: Complex64, m22: Complex64) -> Self {
        Self { m11, m12, m21, m22 }
    }

    pub fn identity() -> Self {
        let one = Complex64::new(1.0, 0.0);
        let zero = Complex64::new(0.0, 0.0);
        Self::new(one, zero, zero, one)
    }

    pub fn zero() -> Self {
        let zero = Complex64::new(0.0, 0.0);
        Self::new(zero, zero, zero, zero)
    }

    #[inline]
    pub fn det(&self) -> Complex64 {
        self.m11 * self.m22 - self.m12 * self.m21
    }

    /// Integer power by repeated squaring. `pow(0)` is the identity.
    pub fn pow(self, mut exponent: u32) -> Self {
        let mut result = Self::identity();
        let mut base = self;
        while exponent > 0 {
            if exponent & 1 == 1 {
                result = result * base;
            }
            base = base * base;
            exponent >>= 1;
        }
        result
    }

    /// Integer power with the running products renormalized after every
    /// multiplication. Returns `(m, ln_scale)` with `self^n = m * exp(ln_scale)`
    /// and the largest element of `m` of magnitude 1 (unless `m` is zero).
    pub fn pow_scaled(self, mut exponent: u32) -> (Self, f64) {
        let mut result = Self::identity();
        let mut result_scale = 0.0;
        let (mut base, mut base_scale) = self.normalized();
        while exponent > 0 {
            if exponent & 1 == 1 {
                let (m, s) = (result * base).normalized();
                result = m;
                result_scale += base_scale + s;
            }
            exponent >>= 1;
            if exponent > 0 {
                let (m, s) = (base * base).normalized();
                base = m;
                base_scale = 2.0 * base_scale + s;
            }
        }
        (result, result_scale)
    }

    /// Multiply every element by a real factor.
    #[inline]
    pub fn scale(self, factor: f64) -> Self {
        Self::new(
            self.m11.scale(factor),
            self.m12.scale(factor),
            self.m21.scale(factor),
            self.m22.scale(factor),
        )
    }

    /// Largest element magnitude.
    pub fn max_norm(&self) -> f64 {
        [self.m11, self.m12, self.m21, self.m22]
            .iter()
            .map(|c| c.norm())
            .fold(0.0, f64::max)
    }

    /// Divide by the largest element magnitude; returns the log of the divisor.
    fn normalized(self) -> (Self, f64) {
        let max = self.max_norm();
        if max == 0.0 || !max.is_finite() {
            return (self, 0.0);
        }
        (self.scale(max.recip()), max.ln())
    }

    /// Matrix-vector product.
    #[inline]
    pub fn apply(&self, v: [Complex64; 2]) -> [Complex64; 2] {
        [
            self.m11 * v[0] + self.m12 * v[1],
            self.m21 * v[0] + self.m22 * v[1],
        ]
    }

    /// Element-wise comparison within an absolute tolerance.
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        (self.m11 - other.m11).norm() <= tolerance
            && (self.m12 - other.m12).norm() <= tolerance
            && (self.m21 - other.m21).norm() <= tolerance
            && (self.m22 - other.m22).norm() <= tolerance
    }
}

impl Mul for Matrix2 {
    type Output = Matrix2;

    fn mul(self, rhs: Matrix2) -> Matrix2 {
        Matrix2::new(
            self.m11 * rhs.m11 + self.m12 * rhs.m21,
            self.m11 * rhs.m12 + self.m12 * rhs.m22,
            self.m21 * rhs.m11 + self.m22 * rhs.m21,
            self.m21 * rhs.m12 + self.m22 * rhs.m22,
        )
    }
}

/// Scattering to transfer form. `None` when `|S21|` is below
/// [`DEGENERACY_EPSILON`].
pub fn s_to_t(s: &Matrix2) -> Option<Matrix2> {
    if s.m21.norm() < DEGENERACY_EPSILON {
        return None;
    }
    let one = Complex64::new(1.0, 0.0);
    Some(Matrix2::new(
        -s.det().fdiv(s.m21),
        s.m11.fdiv(s.m21),
        -s.m22.fdiv(s.m21),
        one.fdiv(s.m21),
    ))
}

/// Transfer to scattering form. `None` when `|T22|` is below
/// [`DEGENERACY_EPSILON`].
pub fn t_to_s(t: &Matrix2) -> Option<Matrix2> {
    if t.m22.norm() < DEGENERACY_EPSILON {
        return None;
    }
    let one = Complex64::new(1.0, 0.0);
    Some(Matrix2::new(
        t.m12.fdiv(t.m22),
        t.det().fdiv(t.m22),
        one.fdiv(t.m22),
        -t.m21.fdiv(t.m22),
    ))
}

/// Transfer to scattering form for `T = m * exp(ln_scale)` whose determinant
/// is known separately as `det_unit^n`.
///
/// Ratios are taken on `m` directly, so `|T|` may exceed the `f64` range.
/// `None` when `|T22|` is below [`DEGENERACY_EPSILON`].
fn scaled_t_to_s(m: &Matrix2, ln_scale: f64, det_unit: Complex64, n: u32) -> Option<Matrix2> {
    let m22 = m.m22.norm();
    if m22 == 0.0 || m22.ln() + ln_scale < DEGENERACY_EPSILON.ln() {
        return None;
    }
    let one = Complex64::new(1.0, 0.0);
    let n = n as f64;
    let det = Complex64::from_polar(
        (n * det_unit.norm().ln() - ln_scale).exp(),
        n * det_unit.arg(),
    );
    Some(Matrix2::new(
        m.m12.fdiv(m.m22),
        det.fdiv(m.m22),
        one.fdiv(m.m22).scale((-ln_scale).exp()),
        -m.m21.fdiv(m.m22),
    ))
}

/// Errors building a [`UnitCellResponse`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResponseError {
    #[error("Frequency grid is empty")]
    EmptyGrid,
    #[error("Grid has {frequencies} samples but {matrices} matrices were given")]
    LengthMismatch { frequencies: usize, matrices: usize },
}

/// Scattering matrix of one structural period over a frequency grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCellResponse {
    frequencies: Vec<f64>,
    matrices: Vec<Matrix2>,
}

impl UnitCellResponse {
    pub fn new(frequencies: Vec<f64>, matrices: Vec<Matrix2>) -> Result<Self, ResponseError> {
        if frequencies.is_empty() {
            return Err(ResponseError::EmptyGrid);
        }
        if frequencies.len() != matrices.len() {
            return Err(ResponseError::LengthMismatch {
                frequencies: frequencies.len(),
                matrices: matrices.len(),
            });
        }
        Ok(Self {
            frequencies,
            matrices,
        })
    }

    #[inline]
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    #[inline]
    pub fn matrices(&self) -> &[Matrix2] {
        &self.matrices
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

/// Number of whole periods that fit in `structure_length`.
///
/// Returns 0 for a vanishing or non-finite period, which makes the cascade
/// degenerate to a zero response.
pub fn period_count(period: f64, structure_length: f64, rounding: PeriodRounding) -> u32 {
    if !period.is_finite() || period < DEGENERACY_EPSILON {
        return 0;
    }
    let ratio = structure_length / period;
    let n = match rounding {
        PeriodRounding::Nearest => ratio.round(),
        PeriodRounding::Floor => ratio.floor(),
    };
    if n <= 0.0 {
        0
    } else if n >= u32::MAX as f64 {
        u32::MAX
    } else {
        n as u32
    }
}

/// Full-structure response of `n` cascaded periods.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadedSpectrum {
    /// Frequency grid of the unit cell.
    pub frequencies: Vec<f64>,
    /// Full-structure scattering matrix per frequency.
    pub matrices: Vec<Matrix2>,
    /// Period count used.
    pub period_count: u32,
    /// Samples where a conversion hit a near-singular element.
    pub degenerate_samples: usize,
}

impl CascadedSpectrum {
    /// `|S11_total(f)|` per sample.
    pub fn s11_magnitude(&self) -> Vec<f64> {
        self.matrices.iter().map(|m| m.m11.norm()).collect()
    }

    /// Port-1 output for a unit port-1 input shaped by `excitation`.
    pub fn reflected_spectrum(&self, excitation: Excitation) -> Vec<Complex64> {
        let window = excitation_window(excitation, &self.frequencies);
        self.matrices
            .iter()
            .zip(window)
            .map(|(m, a)| {
                let input = [Complex64::new(a, 0.0), Complex64::new(0.0, 0.0)];
                m.apply(input)[0]
            })
            .collect()
    }

    /// Magnitude of [`CascadedSpectrum::reflected_spectrum`].
    pub fn reflected_magnitude(&self, excitation: Excitation) -> Vec<f64> {
        self.reflected_spectrum(excitation)
            .iter()
            .map(|c| c.norm())
            .collect()
    }
}

/// Cascade `n` identical periods.
pub fn cascade(response: &UnitCellResponse, n: u32) -> CascadedSpectrum {
    let frequencies = response.frequencies.clone();

    if n == 0 {
        warn!("Period count is zero; full-structure response degenerates to zero");
        return CascadedSpectrum {
            matrices: vec![Matrix2::zero(); frequencies.len()],
            frequencies,
            period_count: 0,
            degenerate_samples: 0,
        };
    }

    let samples: Vec<(Matrix2, bool)> = response
        .matrices
        .par_iter()
        .map(|s| cascade_sample(s, n))
        .collect();

    let degenerate_samples = samples.iter().filter(|(_, degenerate)| *degenerate).count();
    if degenerate_samples > 0 {
        warn!(
            "{} of {} frequency samples were numerically degenerate (n = {}); substituted identity",
            degenerate_samples,
            samples.len(),
            n
        );
    }

    CascadedSpectrum {
        frequencies,
        matrices: samples.into_iter().map(|(m, _)| m).collect(),
        period_count: n,
        degenerate_samples,
    }
}

/// Cascade a single frequency sample. The flag reports a degenerate conversion.
fn cascade_sample(s: &Matrix2, n: u32) -> (Matrix2, bool) {
    let (t, t_degenerate) = match s_to_t(s) {
        Some(t) => (t, false),
        None => (Matrix2::identity(), true),
    };
    let (total, ln_scale) = t.pow_scaled(n);
    match scaled_t_to_s(&total, ln_scale, t.det(), n) {
        Some(s_total) => (s_total, t_degenerate),
        None => (Matrix2::identity(), true),
    }
}

/// Real amplitude of the port-1 excitation at each grid sample.
pub fn excitation_window(excitation: Excitation, frequencies: &[f64]) -> Vec<f64> {
    match excitation {
        Excitation::Flat => vec![1.0; frequencies.len()],
        Excitation::Gaussian => {
            if frequencies.is_empty() {
                return Vec::new();
            }
            let (lo, hi) = frequencies
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &f| {
                    (lo.min(f), hi.max(f))
                });
            let span = hi - lo;
            if span <= 0.0 {
                return vec![1.0; frequencies.len()];
            }
            let center = frequencies.iter().sum::<f64>() / frequencies.len() as f64;
            let fwhm = 0.1 * span;
            let sigma = fwhm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt());
            frequencies
                .iter()
                .map(|f| (-(f - center).powi(2) / (2.0 * sigma * sigma)).exp())
                .collect()
        }
    }
}
