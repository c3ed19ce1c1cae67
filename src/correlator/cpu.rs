// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A compute unit that runs on the host.

use std::{collections::HashMap, sync::Arc};

use ndarray::{prelude::*, Zip};
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};

use super::{ComputeError, ComputeUnit};
use crate::{
    c32,
    config::RunConfig,
    constants::*,
    delays::DelaySet,
    math::{baseline_to_stations, cexp, num_baselines},
    Jones,
};

/// Polyphase filter bank channelisation, delay compensation by linear
/// interpolation across each block and direct correlation, all on the CPU.
pub struct CpuComputeUnit {
    num_channels: usize,
    num_taps: usize,
    samples_per_channel: usize,

    /// The prototype filter, [tap][channel].
    filter: Array2<f32>,

    fft: Arc<dyn Fft<f32>>,

    /// The last `num_taps - 1` spectra's worth of input of every subband,
    /// [station][sample][pol]. Blocks arrive in order, so the filter bank
    /// runs continuously across block boundaries.
    history: HashMap<usize, Array3<c32>>,
}

impl CpuComputeUnit {
    pub fn new(config: &RunConfig) -> CpuComputeUnit {
        let mut planner = FftPlanner::new();
        CpuComputeUnit {
            num_channels: config.num_channels,
            num_taps: config.num_taps,
            samples_per_channel: config.samples_per_channel(),
            filter: filter_coefficients(config.num_channels, config.num_taps),
            fft: planner.plan_fft_forward(config.num_channels),
            history: HashMap::new(),
        }
    }
}

/// A Hann-windowed sinc low-pass filter with its cutoff at half a channel
/// width, normalised to unit gain at DC. The dimensions are [tap][channel].
fn filter_coefficients(num_channels: usize, num_taps: usize) -> Array2<f32> {
    let n = (num_channels * num_taps) as f64;
    let centre = (n - 1.0) / 2.0;
    let mut filter = Array2::from_shape_fn((num_taps, num_channels), |(tap, ch)| {
        let i = (tap * num_channels + ch) as f64;
        let x = (i - centre) / num_channels as f64;
        let sinc = if x.abs() < 1e-12 {
            1.0
        } else {
            (PI * x).sin() / (PI * x)
        };
        let window = 0.5 - 0.5 * (TAU * (i + 0.5) / n).cos();
        (sinc * window) as f32
    });
    let sum = filter.sum();
    filter.mapv_inplace(|c| c / sum);
    filter
}

fn check_shape(what: &'static str, got: &[usize], expected: &[usize]) -> Result<(), ComputeError> {
    if got != expected {
        return Err(ComputeError::Shape {
            what,
            expected: expected.to_vec(),
            got: got.to_vec(),
        });
    }
    Ok(())
}

impl ComputeUnit for CpuComputeUnit {
    fn name(&self) -> &str {
        "cpu"
    }

    fn channelize(
        &mut self,
        subband: usize,
        samples: ArrayView3<c32>,
        mut out: ArrayViewMut4<c32>,
    ) -> Result<(), ComputeError> {
        let num_channels = self.num_channels;
        let num_taps = self.num_taps;
        let samples_per_channel = self.samples_per_channel;
        let num_stations = samples.len_of(Axis(0));
        check_shape(
            "samples",
            samples.shape(),
            &[
                num_stations,
                num_channels * samples_per_channel,
                NUM_POLARISATIONS,
            ],
        )?;
        check_shape(
            "channelised samples",
            out.shape(),
            &[
                num_stations,
                num_channels,
                samples_per_channel,
                NUM_POLARISATIONS,
            ],
        )?;

        let history_len = (num_taps - 1) * num_channels;
        let history = self
            .history
            .entry(subband)
            .or_insert_with(|| Array3::zeros((num_stations, history_len, NUM_POLARISATIONS)));
        let filter = &self.filter;
        let fft = &self.fft;

        Zip::from(out.outer_iter_mut())
            .and(samples.outer_iter())
            .and(history.outer_iter_mut())
            .par_for_each(|mut out, samples, mut history| {
                let mut spectrum = vec![c32::default(); num_channels];
                let mut scratch = vec![c32::default(); fft.get_inplace_scratch_len()];
                let mut series = Vec::with_capacity(history_len + samples.len_of(Axis(0)));

                for pol in 0..NUM_POLARISATIONS {
                    series.clear();
                    series.extend(history.column(pol).iter().copied());
                    series.extend(samples.column(pol).iter().copied());

                    for t in 0..samples_per_channel {
                        for (n, s) in spectrum.iter_mut().enumerate() {
                            *s = filter
                                .column(n)
                                .iter()
                                .enumerate()
                                .map(|(tap, &h)| series[(t + tap) * num_channels + n] * h)
                                .sum();
                        }
                        fft.process_with_scratch(&mut spectrum, &mut scratch);
                        // Lowest frequency first.
                        for (k, &s) in spectrum.iter().enumerate() {
                            out[((k + num_channels / 2) % num_channels, t, pol)] = s;
                        }
                    }

                    let keep = series.len() - history_len;
                    history
                        .column_mut(pol)
                        .iter_mut()
                        .zip(&series[keep..])
                        .for_each(|(h, &s)| *h = s);
                }
            });
        Ok(())
    }

    fn correct_phases(
        &mut self,
        frequencies_hz: &[f64],
        delays: &DelaySet,
        mut data: ArrayViewMut4<c32>,
    ) -> Result<(), ComputeError> {
        let (num_stations, num_channels, num_times, _) = data.dim();
        check_shape(
            "channel frequencies",
            &[frequencies_hz.len()],
            &[num_channels],
        )?;
        check_shape(
            "delays",
            &[delays.num_stations()],
            &[num_stations],
        )?;

        data.outer_iter_mut()
            .into_par_iter()
            .enumerate()
            .for_each(|(station, mut data)| {
                for t in 0..num_times {
                    // The middle of the integration of this output sample.
                    let frac = (t as f64 + 0.5) / num_times as f64;
                    for pol in 0..NUM_POLARISATIONS {
                        let d = delays.interpolate(station, pol, frac);
                        for (ch, &freq) in frequencies_hz.iter().enumerate() {
                            data[(ch, t, pol)] *= cexp(-(TAU * freq * d.delay + d.phase));
                        }
                    }
                }
            });
        Ok(())
    }

    fn correlate(
        &mut self,
        data: ArrayView4<c32>,
        mut visibilities: ArrayViewMut2<Jones<f32>>,
    ) -> Result<(), ComputeError> {
        let (num_stations, num_channels, num_times, _) = data.dim();
        check_shape(
            "visibilities",
            visibilities.shape(),
            &[num_baselines(num_stations), num_channels],
        )?;

        visibilities
            .outer_iter_mut()
            .into_par_iter()
            .enumerate()
            .for_each(|(baseline, mut vis_c)| {
                let (s1, s2) = baseline_to_stations(baseline);
                for (ch, vis) in vis_c.iter_mut().enumerate() {
                    let mut sum = Jones::zero();
                    for t in 0..num_times {
                        sum += Jones::outer(
                            data[(s1, ch, t, 0)],
                            data[(s1, ch, t, 1)],
                            data[(s2, ch, t, 0)],
                            data[(s2, ch, t, 1)],
                        );
                    }
                    *vis = sum;
                }
            });
        Ok(())
    }
}
