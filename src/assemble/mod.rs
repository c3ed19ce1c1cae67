// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Assembly of one station's packets into time-aligned blocks.

Two blocks are open at any time: `current` and `next`, held in a two-slot ring
indexed by block sequence number modulo 2. A packet is copied into whichever
of the two it overlaps, and exactly the copied samples are marked present.
Packets older than `current` are late and packets newer than `next` are from
the future; both are counted and dropped. When `current` is done it is handed
downstream, `next` takes its place, and a fresh block is opened after it.

When `current` is done depends on the [`AssemblyMode`]. In real-time mode,
every board is read on its own thread and `current` is emitted once every
board has moved past it, or once its wall-clock deadline has passed. In batch
mode the boards are read in timestamp order, and `current` is emitted once the
oldest unread packet is past it.
 */

mod batch;
mod clock;
mod realtime;
mod stats;
#[cfg(test)]
mod tests;

pub use clock::SampleClock;
pub use stats::{AssemblerCounts, AssemblerStats};

use std::{sync::Arc, time::Duration};

use crossbeam_utils::atomic::AtomicCell;
use log::{debug, info, trace, warn};
use ndarray::s;

use crate::{
    block::{BlockId, SampleBlock},
    config::{AssemblyMode, ConfigError, RunConfig},
    delays::DelayTimeline,
    misc::RateLimited,
    packet::{Packet, PacketReader},
    pool::BufferPool,
    remap::BeamletRemapper,
};

/// What happened to a packet given to [`BlockAssembler::write_packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// At least part of the packet was inside the open blocks.
    Written,

    /// The packet ended before the oldest open block.
    Late,

    /// The packet started after the newest open block.
    Future,

    /// The packet is after the end of the observation.
    AfterStop,
}

/// Make the pool of blocks a station's assembler fills.
pub fn block_pool(config: &RunConfig, station: usize) -> BufferPool<SampleBlock> {
    BufferPool::new(&format!("blocks-{station}"), config.pool_size, || {
        SampleBlock::new(station, config.num_subbands(), config.block_size)
    })
}

pub struct BlockAssembler {
    config: Arc<RunConfig>,
    station: usize,
    remapper: BeamletRemapper,

    /// Blocks come from, and are published to, this pool.
    output: BufferPool<SampleBlock>,

    delays: Option<DelayTimeline>,
    clock: SampleClock,

    /// `current` and `next`, at `current % 2` and `(current + 1) % 2`. A slot
    /// is `None` past the end of the observation.
    ring: [Option<SampleBlock>; 2],

    /// The sequence number of `current`.
    current: u64,

    stats: Arc<AssemblerStats>,
    stop: Arc<AtomicCell<bool>>,

    future_warning: RateLimited,
    progress: RateLimited,
}

impl BlockAssembler {
    pub fn new(
        config: Arc<RunConfig>,
        station: usize,
        output: BufferPool<SampleBlock>,
        stats: Arc<AssemblerStats>,
        stop: Arc<AtomicCell<bool>>,
    ) -> Result<BlockAssembler, ConfigError> {
        let remapper = BeamletRemapper::new(
            &config.stations[station],
            config.num_subbands(),
            config.num_slots_per_board,
        )?;
        Ok(BlockAssembler {
            clock: SampleClock::new(config.sample_rate_hz),
            config,
            station,
            remapper,
            output,
            delays: None,
            ring: [None, None],
            current: 0,
            stats,
            stop,
            future_warning: RateLimited::new(Duration::from_secs(10)),
            progress: RateLimited::new(Duration::from_secs(10)),
        })
    }

    /// Attach each block's delays from `timeline`. Without a timeline, blocks
    /// carry zero delays.
    pub fn with_delays(mut self, timeline: DelayTimeline) -> BlockAssembler {
        self.delays = Some(timeline);
        self
    }

    /// Use `clock` for real-time deadlines instead of the system clock.
    pub fn with_clock(mut self, clock: SampleClock) -> BlockAssembler {
        self.clock = clock;
        self
    }

    pub fn stats(&self) -> &Arc<AssemblerStats> {
        &self.stats
    }

    /// The sequence number of the oldest open block.
    pub fn current_seq(&self) -> u64 {
        self.current
    }

    /// Read every board until the inputs end, the observation ends or a stop
    /// is requested, then emit what's left and the end sentinel.
    pub fn run(mut self, readers: Vec<PacketReader>) -> AssemblerCounts {
        info!(
            "Station {}: assembling {} boards in {} mode",
            self.station,
            readers.len(),
            self.config.mode
        );
        if self.open() {
            match self.config.mode {
                AssemblyMode::RealTime => self.run_real_time(readers),
                AssemblyMode::Batch => self.run_batch(readers),
            }
        }
        self.finish();
        if let Some(timeline) = self.delays.take() {
            timeline.stop();
        }

        let counts = self.stats.counts();
        info!("Station {}: {counts}", self.station);
        counts
    }

    /// Open the first two blocks. Returns false if the output pool has been
    /// shut down.
    pub fn open(&mut self) -> bool {
        self.current = 0;
        self.prepare(0) && self.prepare(1)
    }

    fn in_observation(&self, seq: u64) -> bool {
        self.config.num_blocks().map(|n| seq < n).unwrap_or(true)
    }

    /// Put a fresh block `seq` into its ring slot.
    fn prepare(&mut self, seq: u64) -> bool {
        let slot = (seq % 2) as usize;
        if !self.in_observation(seq) {
            self.ring[slot] = None;
            return true;
        }

        let Some(mut block) = self.output.acquire() else {
            debug!("Station {}: block pool shut down", self.station);
            return false;
        };
        block.reset(BlockId {
            seq,
            begin: self.config.block_begin(seq),
        });
        match &self.delays {
            Some(timeline) => {
                timeline.next_into(&mut block.delays);
            }
            None => block.delays.clear(),
        }
        self.ring[slot] = Some(block);
        true
    }

    fn current_block(&self) -> Option<&SampleBlock> {
        self.ring[(self.current % 2) as usize].as_ref()
    }

    /// The timestamp just after `current`, if there is a current block.
    pub fn current_end(&self) -> Option<u64> {
        self.current_block().map(SampleBlock::end)
    }

    /// Copy the parts of `packet` that overlap the open blocks.
    pub fn write_packet(&mut self, packet: &Packet) -> WriteOutcome {
        let begin = packet.begin();
        let end = packet.end();
        let block_size = self.config.block_size as u64;
        let window_begin = self.config.block_begin(self.current);

        if end <= window_begin {
            self.stats.late_packets.fetch_add(1);
            trace!(
                "Station {}: late packet at {begin} (window starts at {window_begin})",
                self.station
            );
            return WriteOutcome::Late;
        }
        let stop = self.config.stop_sample;
        if stop.map(|stop| begin >= stop).unwrap_or(false) {
            return WriteOutcome::AfterStop;
        }
        let num_open = self.ring.iter().filter(|b| b.is_some()).count() as u64;
        let window_end = window_begin + num_open * block_size;
        if begin >= window_end {
            self.stats.future_packets.fetch_add(1);
            if let Some(suppressed) = self.future_warning.check() {
                warn!(
                    "Station {}: discarding packet from the future at {begin} (window ends at {window_end}; {suppressed} similar messages suppressed)",
                    self.station
                );
            }
            return WriteOutcome::Future;
        }

        let board = packet.header.board;
        let mut copied = 0;
        for seq in [self.current, self.current + 1] {
            let Some(block) = self.ring[(seq % 2) as usize].as_mut() else {
                continue;
            };
            let lo = begin.max(block.id.begin);
            let mut hi = end.min(block.end());
            if let Some(stop) = stop {
                hi = hi.min(stop);
            }
            if lo >= hi {
                continue;
            }

            let src = (lo - begin) as usize..(hi - begin) as usize;
            let dst = (lo - block.id.begin) as usize;
            for beamlet in 0..packet.header.num_beamlets {
                if let Some(subband) = self.remapper.subband(board, beamlet) {
                    block.write(
                        subband,
                        dst,
                        packet.samples.slice(s![beamlet, src.clone(), ..]),
                    );
                    copied += src.len() as u64;
                }
            }
        }

        self.stats.packets_written.fetch_add(1);
        self.stats.samples_copied.fetch_add(copied);
        WriteOutcome::Written
    }

    /// Hand `current` downstream; `next` becomes `current` and a fresh block
    /// becomes `next`. Returns false once there is nothing left to assemble,
    /// i.e. the observation is over or the output pool was shut down.
    pub fn advance(&mut self) -> bool {
        if let Some(block) = self.ring[(self.current % 2) as usize].take() {
            self.emit(block);
        }
        self.current += 1;
        if !self.prepare(self.current + 1) {
            return false;
        }
        self.current_block().is_some()
    }

    fn emit(&mut self, block: SampleBlock) {
        trace!(
            "Station {}: emitting block {} ({} samples present)",
            self.station,
            block.id.seq,
            block.num_present()
        );
        self.output.publish(block);
        self.stats.blocks_emitted.fetch_add(1);
        if self.progress.check().is_some() {
            info!("Station {}: {}", self.station, self.stats.counts());
        }
    }

    /// Emit the open blocks up to the last one holding any data, then the end
    /// sentinel. Trailing empty blocks are put back in the pool.
    pub fn finish(&mut self) {
        let seqs = [self.current, self.current + 1];
        let last_with_data = seqs.iter().rposition(|seq| {
            self.ring[(seq % 2) as usize]
                .as_ref()
                .map(|b| !b.is_empty())
                .unwrap_or(false)
        });
        for (i, seq) in seqs.into_iter().enumerate() {
            if let Some(block) = self.ring[(seq % 2) as usize].take() {
                match last_with_data {
                    Some(last) if i <= last => self.emit(block),
                    _ => self.output.release(block),
                }
            }
        }
        self.output.finish();
        debug!("Station {}: assembly finished", self.station);
    }
}
