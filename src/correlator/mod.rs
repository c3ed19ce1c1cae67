// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Correlation of received blocks into flagged, weighted visibilities.

Per block and subband: flagged samples are zeroed, the subband is split into
channels (only with more than one channel), delays are compensated, every
baseline is correlated into one [`Jones`] matrix per channel, and the
visibilities are scaled by a weight derived from the number of valid samples
that went into them.
 */

mod cpu;
mod error;
pub mod flagging;
mod stage;
mod timers;

pub use cpu::CpuComputeUnit;
pub use error::ComputeError;
pub use stage::{correlated_block_pool, CorrelatorStage};
pub use timers::{Stage, StageTimers};

use ndarray::prelude::*;

use crate::{block::BlockId, c32, delays::DelaySet, Jones};

/// The device that does the heavy lifting. [`CpuComputeUnit`] runs on the
/// host; GPU implementations live outside this crate.
///
/// Sample arrays handed to a compute unit have dimensions
/// [station][channel][time][pol], except for the input of
/// [`ComputeUnit::channelize`], which is [station][sample][pol].
pub trait ComputeUnit: Send {
    fn name(&self) -> &str;

    /// Split the samples of `subband` into channels, writing them to `out`.
    /// Channel 0 is the lowest frequency. Calls for the same subband come in
    /// block order, so filter state may be carried between them.
    fn channelize(
        &mut self,
        subband: usize,
        samples: ArrayView3<c32>,
        out: ArrayViewMut4<c32>,
    ) -> Result<(), ComputeError>;

    /// Compensate `data` for the station delays of the block. `frequencies_hz`
    /// holds the frequency of each channel.
    fn correct_phases(
        &mut self,
        frequencies_hz: &[f64],
        delays: &DelaySet,
        data: ArrayViewMut4<c32>,
    ) -> Result<(), ComputeError>;

    /// Correlate every baseline, overwriting `visibilities` ([baseline][channel]).
    fn correlate(
        &mut self,
        data: ArrayView4<c32>,
        visibilities: ArrayViewMut2<Jones<f32>>,
    ) -> Result<(), ComputeError>;
}

/// The correlation products of one subband.
#[derive(Debug, Clone, PartialEq)]
pub struct SubbandVisibilities {
    pub subband: usize,

    /// [baseline][channel]; already multiplied by `weights`.
    pub visibilities: Array2<Jones<f32>>,

    /// [baseline][channel]
    pub valid_samples: Array2<u32>,

    /// [baseline][channel]
    pub weights: Array2<f32>,
}

impl SubbandVisibilities {
    pub fn new(subband: usize, num_baselines: usize, num_channels: usize) -> SubbandVisibilities {
        SubbandVisibilities {
            subband,
            visibilities: Array2::default((num_baselines, num_channels)),
            valid_samples: Array2::zeros((num_baselines, num_channels)),
            weights: Array2::zeros((num_baselines, num_channels)),
        }
    }

    fn clear(&mut self) {
        self.visibilities.fill(Jones::default());
        self.valid_samples.fill(0);
        self.weights.fill(0.0);
    }
}

/// The output of the correlator for one block.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedBlock {
    pub id: BlockId,

    /// One entry per subband of the node, in ascending subband order.
    pub subbands: Vec<SubbandVisibilities>,

    /// Stations that didn't deliver this block.
    pub substituted: Vec<usize>,

    /// The compute unit failed on this block; everything is zero.
    pub failed: bool,
}

impl CorrelatedBlock {
    pub fn new(subbands: &[usize], num_baselines: usize, num_channels: usize) -> CorrelatedBlock {
        CorrelatedBlock {
            id: BlockId { seq: 0, begin: 0 },
            subbands: subbands
                .iter()
                .map(|&sb| SubbandVisibilities::new(sb, num_baselines, num_channels))
                .collect(),
            substituted: vec![],
            failed: false,
        }
    }

    /// Zero every product, valid-sample count and weight.
    pub(crate) fn invalidate(&mut self) {
        self.subbands.iter_mut().for_each(SubbandVisibilities::clear);
        self.failed = true;
    }
}
