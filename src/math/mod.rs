// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Some helper mathematics.


use crate::c32;

/// The number of baselines between `num_stations` stations, including the
/// auto-correlations.
#[inline]
pub(crate) fn num_baselines(num_stations: usize) -> usize {
    num_stations * (num_stations + 1) / 2
}

/// The baseline index of stations `s1` and `s2`, where `s2 <= s1`. Baselines
/// are ordered (0,0), (1,0), (1,1), (2,0), ...
#[inline]
pub(crate) fn baseline_index(s1: usize, s2: usize) -> usize {
    debug_assert!(s2 <= s1);
    s1 * (s1 + 1) / 2 + s2
}

/// The inverse of [`baseline_index`].
pub(crate) fn baseline_to_stations(baseline: usize) -> (usize, usize) {
    // Walk the triangle; station counts are small.
    let mut s1 = 0;
    while baseline_index(s1 + 1, 0) <= baseline {
        s1 += 1;
    }
    (s1, baseline - baseline_index(s1, 0))
}

/// Complex exponential. The argument is assumed to be purely imaginary.
///
/// This function doesn't actually use complex numbers; it just returns the real
/// and imag components from Euler's formula (i.e. e^{ix} = cos{x} + i sin{x}).
#[inline]
pub(crate) fn cexp(x: f64) -> c32 {
    let (im, re) = x.sin_cos();
    c32::new(re as f32, im as f32)
}

/// log2 of a power of two.
#[inline]
pub(crate) fn log2(n: usize) -> u32 {
    debug_assert!(n.is_power_of_two());
    n.trailing_zeros()
}
