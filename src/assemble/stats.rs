// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crossbeam_utils::atomic::AtomicCell;

/// Counters kept while assembling one station's blocks. They are updated by
/// the board readers and the assembler concurrently, and can be read at any
/// time.
#[derive(Debug, Default)]
pub struct AssemblerStats {
    /// Packets read from any board, good or bad.
    pub packets_received: AtomicCell<u64>,

    /// Packets that overlapped the block window and were copied.
    pub packets_written: AtomicCell<u64>,

    /// Packets that ended before the oldest open block.
    pub late_packets: AtomicCell<u64>,

    /// Packets that started after the newest open block.
    pub future_packets: AtomicCell<u64>,

    /// Packets the station flagged as having a bad payload.
    pub payload_errors: AtomicCell<u64>,

    /// Packets with a malformed or unexpected header or payload.
    pub invalid_packets: AtomicCell<u64>,

    /// Blocks that were emitted because their deadline passed.
    pub deadline_misses: AtomicCell<u64>,

    pub blocks_emitted: AtomicCell<u64>,

    /// Complex samples (per polarisation pair) copied into blocks.
    pub samples_copied: AtomicCell<u64>,
}

/// A snapshot of [`AssemblerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerCounts {
    pub packets_received: u64,
    pub packets_written: u64,
    pub late_packets: u64,
    pub future_packets: u64,
    pub payload_errors: u64,
    pub invalid_packets: u64,
    pub deadline_misses: u64,
    pub blocks_emitted: u64,
    pub samples_copied: u64,
}

impl AssemblerStats {
    pub fn counts(&self) -> AssemblerCounts {
        AssemblerCounts {
            packets_received: self.packets_received.load(),
            packets_written: self.packets_written.load(),
            late_packets: self.late_packets.load(),
            future_packets: self.future_packets.load(),
            payload_errors: self.payload_errors.load(),
            invalid_packets: self.invalid_packets.load(),
            deadline_misses: self.deadline_misses.load(),
            blocks_emitted: self.blocks_emitted.load(),
            samples_copied: self.samples_copied.load(),
        }
    }
}

impl std::fmt::Display for AssemblerCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} blocks emitted ({} deadline misses); {} packets received, {} written, {} late, {} future, {} payload errors, {} invalid",
            self.blocks_emitted,
            self.deadline_misses,
            self.packets_received,
            self.packets_written,
            self.late_packets,
            self.future_packets,
            self.payload_errors,
            self.invalid_packets,
        )
    }
}
