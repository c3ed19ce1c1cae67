// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
2x2 complex matrices holding the four polarisation products of a
visibility.

The elements are ordered XX, XY, YX, YY.
 */

use std::ops::{AddAssign, Index, IndexMut, Mul, MulAssign};

use num_complex::Complex;
use num_traits::{Float, Zero};

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Jones<F: Float>([Complex<F>; 4]);

impl<F: Float> Jones<F> {
    #[inline]
    pub fn zero() -> Self {
        Jones([Complex::zero(); 4])
    }

    #[inline]
    pub fn identity() -> Self {
        Jones([
            Complex::new(F::one(), F::zero()),
            Complex::zero(),
            Complex::zero(),
            Complex::new(F::one(), F::zero()),
        ])
    }

    /// The four products of the polarisations of two signals, `(x1, y1)` and
    /// `(x2, y2)`, with the second signal conjugated: `[x1 x2*, x1 y2*, y1 x2*,
    /// y1 y2*]`.
    #[inline(always)]
    pub fn outer(x1: Complex<F>, y1: Complex<F>, x2: Complex<F>, y2: Complex<F>) -> Self {
        let x2 = x2.conj();
        let y2 = y2.conj();
        Jones([x1 * x2, x1 * y2, y1 * x2, y1 * y2])
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<Complex<F>> {
        self.0.iter()
    }
}

impl<F: Float> Default for Jones<F> {
    fn default() -> Self {
        Jones::zero()
    }
}

impl<F: Float> From<[Complex<F>; 4]> for Jones<F> {
    #[inline]
    fn from(arr: [Complex<F>; 4]) -> Self {
        Jones(arr)
    }
}

impl<F: Float> Index<usize> for Jones<F> {
    type Output = Complex<F>;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<F: Float> IndexMut<usize> for Jones<F> {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}

impl<F: Float> AddAssign for Jones<F> {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Self) {
        self[0] = self[0] + rhs[0];
        self[1] = self[1] + rhs[1];
        self[2] = self[2] + rhs[2];
        self[3] = self[3] + rhs[3];
    }
}

impl<F: Float> Mul<F> for Jones<F> {
    type Output = Self;

    #[inline(always)]
    fn mul(mut self, rhs: F) -> Self {
        self *= rhs;
        self
    }
}

impl<F: Float> MulAssign<F> for Jones<F> {
    #[inline(always)]
    fn mul_assign(&mut self, rhs: F) {
        self[0] = self[0] * rhs;
        self[1] = self[1] * rhs;
        self[2] = self[2] * rhs;
        self[3] = self[3] * rhs;
    }
}

impl<F: Float> Zero for Jones<F> {
    #[inline]
    fn zero() -> Self {
        Jones::zero()
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.0.iter().all(|c| c.is_zero())
    }
}

impl<F: Float> std::ops::Add for Jones<F> {
    type Output = Self;

    #[inline(always)]
    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

#[cfg(test)]
impl approx::AbsDiffEq for Jones<f32> {
    type Epsilon = f32;

    fn default_epsilon() -> f32 {
        f32::EPSILON
    }

    #[inline]
    fn abs_diff_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| (a - b).norm() <= epsilon)
    }
}
