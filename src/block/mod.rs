// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The unit of work of a station: a fixed-length span of samples for every
//! subband, together with which of those samples actually arrived.

use ndarray::prelude::*;
use num_complex::Complex;

use crate::{constants::NUM_POLARISATIONS, delays::DelaySet, flags::FlagSet};

/// Where a block sits in the observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId {
    /// The block sequence number; 0 is the first block of the observation.
    pub seq: u64,

    /// The absolute sample timestamp of the first sample.
    pub begin: u64,
}

/// One station's samples for one block. Blocks are allocated once (see
/// [`crate::BufferPool`]) and reset for every reuse.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    pub station: usize,

    pub id: BlockId,

    /// The samples of every subband. The dimensions are [subband][sample][pol].
    pub samples: Array3<Complex<i16>>,

    /// For each subband, the samples that were written. Everything else is
    /// missing.
    pub flags: Vec<FlagSet>,

    /// The station's delays at the start of this block and just after it.
    pub delays: DelaySet,
}

impl SampleBlock {
    pub fn new(station: usize, num_subbands: usize, block_size: usize) -> SampleBlock {
        SampleBlock {
            station,
            id: BlockId { seq: 0, begin: 0 },
            samples: Array3::zeros((num_subbands, block_size, NUM_POLARISATIONS)),
            flags: vec![FlagSet::new(); num_subbands],
            delays: DelaySet::zeros(1),
        }
    }

    /// Prepare the block to hold block `id`. Nothing is present afterwards.
    pub fn reset(&mut self, id: BlockId) {
        self.id = id;
        self.samples.fill(Complex::new(0, 0));
        self.flags.iter_mut().for_each(FlagSet::clear);
    }

    pub fn num_subbands(&self) -> usize {
        self.samples.len_of(Axis(0))
    }

    /// The number of samples in the block.
    pub fn len(&self) -> usize {
        self.samples.len_of(Axis(1))
    }

    /// The absolute sample timestamp just after the last sample.
    pub fn end(&self) -> u64 {
        self.id.begin + self.len() as u64
    }

    /// True if no sample of any subband has been written.
    pub fn is_empty(&self) -> bool {
        self.flags.iter().all(FlagSet::is_empty)
    }

    /// Copy `src` (dimensions [sample][pol]) into `subband` starting `offset`
    /// samples into the block, and mark exactly those samples as present.
    pub fn write(&mut self, subband: usize, offset: usize, src: ArrayView2<Complex<i16>>) {
        let n = src.len_of(Axis(0));
        debug_assert!(offset + n <= self.len());
        self.samples
            .slice_mut(s![subband, offset..offset + n, ..])
            .assign(&src);
        self.flags[subband].include(offset, offset + n);
    }

    /// The number of present samples, summed over all subbands.
    pub fn num_present(&self) -> usize {
        self.flags.iter().map(FlagSet::count).sum()
    }
}
