// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod config_file;
mod station_to_node;

use std::{sync::Arc, thread};

use indoc::indoc;
use num_complex::Complex;

use hypercorr::{
    BufferPool, CorrelatedBlock, NodePipeline, Packet, PacketHeader, RunConfig, SampleBits,
};

/// Two stations of two boards, each board carrying two subbands in slots 0
/// and 1 of 3. Node 0 correlates subbands 0 and 1, node 1 the rest. Blocks
/// are 64 samples and the observation is three blocks long.
const TWO_STATIONS: &str = indoc! {r#"
    sample_rate_hz = 1000.0
    block_size = 64
    sample_bits = 16
    mode = "batch"
    start_sample = 0
    stop_sample = 192
    num_taps = 4
    receive_timeout_ms = 2000
    num_slots_per_board = 3
    subband_frequencies_hz = [100e6, 100.2e6, 100.4e6, 100.6e6]

    [[stations]]
    name = "CS001"
    num_boards = 2
    beamlets = [[0, 0], [0, 1], [1, 0], [1, 1]]

    [[stations]]
    name = "CS002"
    num_boards = 2
    beamlets = [[0, 0], [0, 1], [1, 0], [1, 1]]

    [[nodes]]
    name = "cbt001"
    subbands = [0, 1]

    [[nodes]]
    name = "cbt002"
    subbands = [2, 3]
"#};

fn two_stations() -> Arc<RunConfig> {
    Arc::new(RunConfig::from_toml_str(TWO_STATIONS).unwrap())
}

/// Packets of `board` covering `[begin, end)`, except those starting in
/// `skip`. X is always 1 and Y always i.
fn packets(board: usize, begin: u64, end: u64, skip: std::ops::Range<u64>) -> Vec<Packet> {
    (begin..end)
        .step_by(16)
        .filter(|t| !skip.contains(t))
        .map(|timestamp| {
            let mut packet = Packet::new(PacketHeader {
                board,
                payload_error: false,
                sample_bits: SampleBits::Sixteen,
                num_beamlets: 3,
                timestamp,
            });
            for ((_, _, pol), s) in packet.samples.indexed_iter_mut() {
                *s = if pol == 0 {
                    Complex::new(1, 0)
                } else {
                    Complex::new(0, 1)
                };
            }
            packet
        })
        .collect()
}

/// Take every correlated block of a node on another thread.
fn collect(node: &NodePipeline) -> thread::JoinHandle<Vec<CorrelatedBlock>> {
    let output: BufferPool<CorrelatedBlock> = node.output();
    thread::spawn(move || {
        let mut blocks = vec![];
        while let Some(block) = output.consume() {
            blocks.push(block.clone());
            output.release(block);
        }
        blocks
    })
}
