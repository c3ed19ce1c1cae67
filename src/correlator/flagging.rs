// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Turning missing samples into valid-sample counts and visibility weights.

use ndarray::{prelude::*, Zip};

use crate::{
    constants::WEIGHT_NORMALISATION,
    flags::FlagSet,
    math::{baseline_to_stations, log2},
    Jones,
};

/// Convert the missing samples of a block into the channelised time samples
/// they spoil. A missing input sample affects every output sample the filter
/// bank's taps reach, so ranges grow by `num_taps - 1` at the front.
pub fn channel_flags(
    missing: &FlagSet,
    num_channels: usize,
    num_taps: usize,
    samples_per_channel: usize,
) -> FlagSet {
    if num_channels == 1 {
        let mut flags = missing.clone();
        flags.clip(samples_per_channel);
        return flags;
    }

    let shift = log2(num_channels);
    let mut flags = FlagSet::new();
    for range in missing.ranges() {
        let begin = (range.start >> shift).saturating_sub(num_taps - 1);
        let end = (samples_per_channel + 1).min(((range.end - 1) >> shift) + 1);
        flags.include(begin, end);
    }
    flags
}

/// Fill `valid_samples` ([baseline][channel]) from the channel flags of every
/// station. With more than one channel, channel 0 (which holds the edges of
/// the subband) never has valid samples.
pub fn valid_samples(
    channel_flags: ArrayView1<FlagSet>,
    samples_per_channel: usize,
    mut valid_samples: ArrayViewMut2<u32>,
) {
    let num_channels = valid_samples.len_of(Axis(1));
    for (baseline, mut row) in valid_samples.outer_iter_mut().enumerate() {
        let (s1, s2) = baseline_to_stations(baseline);
        let flagged = (&channel_flags[s1] | &channel_flags[s2]).count();
        row.fill(samples_per_channel.saturating_sub(flagged) as u32);
        if num_channels > 1 {
            row[0] = 0;
        }
    }
}

/// The weight of a visibility integrating `valid_samples` samples.
#[inline]
pub fn weight(valid_samples: u32) -> f32 {
    if valid_samples == 0 {
        0.0
    } else {
        WEIGHT_NORMALISATION / valid_samples as f32
    }
}

/// Work out the weights and scale every polarisation product by them.
pub fn apply_weights(
    visibilities: ArrayViewMut2<Jones<f32>>,
    valid_samples: ArrayView2<u32>,
    weights: ArrayViewMut2<f32>,
) {
    Zip::from(visibilities)
        .and(valid_samples)
        .and(weights)
        .for_each(|vis, &n, w| {
            *w = weight(n);
            *vis *= *w;
        });
}
