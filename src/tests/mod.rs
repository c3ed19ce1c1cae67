// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helpful functions for tests.

use num_complex::Complex;
use vec1::Vec1;

use crate::{
    config::{AssemblyMode, NodeConfig, RunConfig, SampleBits, StationConfig},
    constants::*,
    packet::{Packet, PacketHeader},
};

/// A small, valid configuration. Subband `sb` is read from board
/// `sb / subbands_per_board`, slot `sb % subbands_per_board`; every board has
/// one spare slot that carries nothing. With more than one subband, the first
/// half of the subbands goes to node 0 and the rest to node 1.
///
/// Samples arrive at 1 kHz, so a block of 100 samples lasts 100 ms. The
/// observation starts at sample 0 and has no stop time.
pub(crate) fn test_config(
    num_stations: usize,
    num_boards: usize,
    subbands_per_board: usize,
    block_size: usize,
    mode: AssemblyMode,
) -> RunConfig {
    let num_subbands = num_boards * subbands_per_board;
    let stations = (0..num_stations)
        .map(|i| StationConfig {
            name: format!("CS{:03}", i + 1),
            num_boards,
            sources: vec![],
            beamlets: (0..num_subbands)
                .map(|sb| (sb / subbands_per_board, sb % subbands_per_board))
                .collect(),
            fixed_delays_s: [0.0; NUM_POLARISATIONS],
        })
        .collect::<Vec<_>>();
    let nodes = if num_subbands > 1 {
        let half = num_subbands / 2;
        vec![
            NodeConfig {
                name: "node0".to_string(),
                subbands: (0..half).collect(),
            },
            NodeConfig {
                name: "node1".to_string(),
                subbands: (half..num_subbands).collect(),
            },
        ]
    } else {
        vec![NodeConfig {
            name: "node0".to_string(),
            subbands: (0..num_subbands).collect(),
        }]
    };

    let config = RunConfig {
        sample_rate_hz: 1_000.0,
        block_size,
        sample_bits: SampleBits::Sixteen,
        mode,
        start_sample: 0,
        stop_sample: None,
        guard_interval_ms: 20,
        num_channels: 1,
        num_taps: 4,
        pool_size: DEFAULT_POOL_SIZE,
        receive_timeout_ms: 500,
        reader_shutdown_timeout_ms: 200,
        num_slots_per_board: subbands_per_board + 1,
        subband_frequencies_hz: (0..num_subbands)
            .map(|i| 100e6 + i as f64 * 0.2e6)
            .collect(),
        stations: Vec1::try_from_vec(stations).unwrap(),
        nodes: Vec1::try_from_vec(nodes).unwrap(),
    };
    config.validate().unwrap();
    config
}

/// A recognisable sample: the real part encodes the timestamp, the imaginary
/// part the board, beamlet and polarisation.
pub(crate) fn test_sample(board: usize, beamlet: usize, timestamp: u64, pol: usize) -> Complex<i16> {
    Complex::new(
        (timestamp % 10_000) as i16,
        (board * 100 + beamlet * 2 + pol) as i16,
    )
}

/// A 16-bit packet filled with [`test_sample`]s.
pub(crate) fn test_packet(board: usize, num_beamlets: usize, timestamp: u64) -> Packet {
    let mut packet = Packet::new(PacketHeader {
        board,
        payload_error: false,
        sample_bits: SampleBits::Sixteen,
        num_beamlets,
        timestamp,
    });
    for ((beamlet, t, pol), s) in packet.samples.indexed_iter_mut() {
        *s = test_sample(board, beamlet, timestamp + t as u64, pol);
    }
    packet
}

/// Consecutive packets covering `[begin, end)`.
pub(crate) fn test_packets(board: usize, num_beamlets: usize, begin: u64, end: u64) -> Vec<Packet> {
    (begin..end)
        .step_by(NUM_SAMPLES_PER_PACKET)
        .map(|t| test_packet(board, num_beamlets, t))
        .collect()
}
