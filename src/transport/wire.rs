// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The encoding of block messages.
//!
//! Metadata (little-endian): `"HCMD"`, `u8` kind (0 block, 1 end of stream),
//! `u32` station, `u64` sequence number, `u64` block begin, `u32` subband
//! count, then per subband `u32` subband, `u32` range count and that many
//! (`u32` begin, `u32` end) ranges of missing samples, then `u32`
//! polarisation count and per polarisation `f64` delay and `f64` phase at the
//! block start followed by the same just after its end.
//!
//! The payload is the samples of the listed subbands, [subband][sample][pol],
//! as native-endian `i16` pairs.

use std::mem::size_of;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::prelude::*;
use num_complex::Complex;
use static_assertions::const_assert_eq;

use super::TransportError;
use crate::{block::SampleBlock, constants::NUM_POLARISATIONS, delays::Delay, flags::FlagSet};

const MAGIC: &[u8; 4] = b"HCMD";

const SAMPLE_SIZE: usize = size_of::<Complex<i16>>();
const_assert_eq!(SAMPLE_SIZE, 4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    Block,
    EndOfStream,
}

/// Everything about one station's contribution to a block except the
/// samples.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMetadata {
    pub kind: MetadataKind,
    pub station: usize,
    pub seq: u64,
    pub begin: u64,

    /// The subbands of the accompanying payload, in payload order.
    pub subbands: Vec<usize>,

    /// For each subband, the samples that are missing.
    pub missing: Vec<FlagSet>,

    /// [pol]
    pub delays_begin: [Delay; NUM_POLARISATIONS],

    /// [pol]
    pub delays_after_end: [Delay; NUM_POLARISATIONS],
}

impl BlockMetadata {
    /// Describe `subbands` of `block`.
    pub fn for_block(block: &SampleBlock, subbands: &[usize]) -> BlockMetadata {
        let mut delays_begin = [Delay::default(); NUM_POLARISATIONS];
        let mut delays_after_end = [Delay::default(); NUM_POLARISATIONS];
        for pol in 0..NUM_POLARISATIONS {
            delays_begin[pol] = block.delays.begin[(0, pol)];
            delays_after_end[pol] = block.delays.after_end[(0, pol)];
        }
        BlockMetadata {
            kind: MetadataKind::Block,
            station: block.station,
            seq: block.id.seq,
            begin: block.id.begin,
            subbands: subbands.to_vec(),
            missing: subbands
                .iter()
                .map(|&sb| block.flags[sb].invert(block.len()))
                .collect(),
            delays_begin,
            delays_after_end,
        }
    }

    /// Tells a node that `station` won't send any more blocks.
    pub fn end_of_stream(station: usize) -> BlockMetadata {
        BlockMetadata {
            kind: MetadataKind::EndOfStream,
            station,
            seq: 0,
            begin: 0,
            subbands: vec![],
            missing: vec![],
            delays_begin: [Delay::default(); NUM_POLARISATIONS],
            delays_after_end: [Delay::default(); NUM_POLARISATIONS],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        // Writing to a Vec can't fail.
        let _ = self.write(&mut buf);
        buf
    }

    fn write(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.extend_from_slice(MAGIC);
        buf.write_u8(match self.kind {
            MetadataKind::Block => 0,
            MetadataKind::EndOfStream => 1,
        })?;
        buf.write_u32::<LittleEndian>(self.station as u32)?;
        buf.write_u64::<LittleEndian>(self.seq)?;
        buf.write_u64::<LittleEndian>(self.begin)?;
        buf.write_u32::<LittleEndian>(self.subbands.len() as u32)?;
        for (&subband, missing) in self.subbands.iter().zip(&self.missing) {
            buf.write_u32::<LittleEndian>(subband as u32)?;
            buf.write_u32::<LittleEndian>(missing.ranges().len() as u32)?;
            for range in missing.ranges() {
                buf.write_u32::<LittleEndian>(range.start as u32)?;
                buf.write_u32::<LittleEndian>(range.end as u32)?;
            }
        }
        buf.write_u32::<LittleEndian>(NUM_POLARISATIONS as u32)?;
        for (b, e) in self.delays_begin.iter().zip(&self.delays_after_end) {
            buf.write_f64::<LittleEndian>(b.delay)?;
            buf.write_f64::<LittleEndian>(b.phase)?;
            buf.write_f64::<LittleEndian>(e.delay)?;
            buf.write_f64::<LittleEndian>(e.phase)?;
        }
        Ok(())
    }

    /// Decode metadata describing blocks of `block_size` samples.
    pub fn decode(mut bytes: &[u8], block_size: usize) -> Result<BlockMetadata, TransportError> {
        let mut magic = [0; 4];
        std::io::Read::read_exact(&mut bytes, &mut magic)?;
        if &magic != MAGIC {
            return Err(TransportError::BadMagic);
        }
        let kind = match bytes.read_u8()? {
            0 => MetadataKind::Block,
            1 => MetadataKind::EndOfStream,
            k => return Err(TransportError::BadKind(k)),
        };
        let station = bytes.read_u32::<LittleEndian>()? as usize;
        let seq = bytes.read_u64::<LittleEndian>()?;
        let begin = bytes.read_u64::<LittleEndian>()?;

        let num_subbands = bytes.read_u32::<LittleEndian>()? as usize;
        let mut subbands = Vec::with_capacity(num_subbands.min(1024));
        let mut missing = Vec::with_capacity(num_subbands.min(1024));
        for _ in 0..num_subbands {
            subbands.push(bytes.read_u32::<LittleEndian>()? as usize);
            let num_ranges = bytes.read_u32::<LittleEndian>()?;
            let mut flags = FlagSet::new();
            for _ in 0..num_ranges {
                let b = bytes.read_u32::<LittleEndian>()?;
                let e = bytes.read_u32::<LittleEndian>()?;
                if b >= e || e as usize > block_size {
                    return Err(TransportError::BadRange {
                        begin: b,
                        end: e,
                        block_size,
                    });
                }
                flags.include(b as usize, e as usize);
            }
            missing.push(flags);
        }

        let mut delays_begin = [Delay::default(); NUM_POLARISATIONS];
        let mut delays_after_end = [Delay::default(); NUM_POLARISATIONS];
        let num_pols = bytes.read_u32::<LittleEndian>()? as usize;
        for pol in 0..num_pols {
            let b = Delay {
                delay: bytes.read_f64::<LittleEndian>()?,
                phase: bytes.read_f64::<LittleEndian>()?,
            };
            let e = Delay {
                delay: bytes.read_f64::<LittleEndian>()?,
                phase: bytes.read_f64::<LittleEndian>()?,
            };
            // Extra polarisations are ignored.
            if pol < NUM_POLARISATIONS {
                delays_begin[pol] = b;
                delays_after_end[pol] = e;
            }
        }

        Ok(BlockMetadata {
            kind,
            station,
            seq,
            begin,
            subbands,
            missing,
            delays_begin,
            delays_after_end,
        })
    }
}

/// The samples of `subbands` of `block`, [subband][sample][pol].
pub fn encode_payload(block: &SampleBlock, subbands: &[usize]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(subbands.len() * block.len() * NUM_POLARISATIONS * SAMPLE_SIZE);
    for &subband in subbands {
        let samples = block.samples.index_axis(Axis(0), subband);
        match samples.as_slice() {
            Some(s) => bytes.extend_from_slice(bytemuck::cast_slice(s)),
            None => samples
                .iter()
                .for_each(|s| bytes.extend_from_slice(bytemuck::bytes_of(s))),
        }
    }
    bytes
}

/// Unpack a payload into `dst` ([subband][sample][pol]).
pub fn decode_payload(
    bytes: &[u8],
    mut dst: ArrayViewMut3<Complex<i16>>,
) -> Result<(), TransportError> {
    let expected = dst.len() * SAMPLE_SIZE;
    if bytes.len() != expected {
        return Err(TransportError::PayloadSize {
            expected,
            got: bytes.len(),
        });
    }
    if expected == 0 {
        return Ok(());
    }

    let subband_size = expected / dst.len_of(Axis(0));
    for (mut subband, chunk) in dst.outer_iter_mut().zip(bytes.chunks_exact(subband_size)) {
        match subband.as_slice_mut() {
            Some(s) => {
                let s: &mut [u8] = bytemuck::cast_slice_mut(s);
                s.copy_from_slice(chunk);
            }
            None => {
                for (s, b) in subband.iter_mut().zip(chunk.chunks_exact(SAMPLE_SIZE)) {
                    *s = bytemuck::pod_read_unaligned(b);
                }
            }
        }
    }
    Ok(())
}
