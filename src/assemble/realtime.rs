// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Real-time assembly: one reader thread per board, one writer, and a
//! wall-clock deadline for every block.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Select};
use crossbeam_utils::atomic::AtomicCell;
use log::{debug, error, warn};

use super::{BlockAssembler, WriteOutcome};
use crate::{
    constants::{NUM_SAMPLES_PER_PACKET, POLL_INTERVAL},
    misc::raise_thread_priority,
    packet::{Packet, PacketError, PacketHeader, PacketReader},
    pool::BufferPool,
};

/// The number of packets each board may have queued for the writer.
const BOARD_QUEUE_DEPTH: usize = 256;

struct BoardThread {
    board: usize,
    handle: thread::JoinHandle<()>,

    /// Disconnects when the thread exits.
    exited: Receiver<()>,
}

impl BlockAssembler {
    pub(super) fn run_real_time(&mut self, readers: Vec<PacketReader>) {
        let queues: Vec<BufferPool<Packet>> = readers
            .iter()
            .map(|reader| {
                let header = PacketHeader {
                    board: reader.board(),
                    payload_error: false,
                    sample_bits: self.config.sample_bits,
                    num_beamlets: self.config.num_slots_per_board,
                    timestamp: 0,
                };
                BufferPool::new(
                    &format!("packets-{}-{}", self.station, reader.board()),
                    BOARD_QUEUE_DEPTH,
                    || Packet::new(header),
                )
            })
            .collect();
        let threads: Vec<BoardThread> = readers
            .into_iter()
            .zip(&queues)
            .map(|(reader, queue)| {
                spawn_reader(self.station, reader, queue.clone(), self.stop.clone())
            })
            .collect();

        self.write_real_time(&queues);

        // Readers blocked on their queues return at once; readers blocked on
        // their source get a little longer.
        for queue in &queues {
            queue.shutdown();
        }
        join_readers(self.station, threads, self.config.reader_shutdown_timeout());
    }

    fn write_real_time(&mut self, queues: &[BufferPool<Packet>]) {
        let guard = self.config.guard_interval();
        let mut live = vec![true; queues.len()];
        // The end of the newest packet from each board.
        let mut latest_end = vec![0; queues.len()];

        loop {
            if self.stop.load() {
                debug!("Station {}: stop requested", self.station);
                break;
            }
            let Some(current_end) = self.current_end() else {
                debug!("Station {}: observation over", self.station);
                break;
            };
            let live_boards: Vec<usize> = (0..queues.len()).filter(|&b| live[b]).collect();
            if live_boards.is_empty() {
                debug!("Station {}: every board has ended", self.station);
                break;
            }

            // Every board has moved past the current block; nothing more will
            // arrive for it.
            if live_boards.iter().all(|&b| latest_end[b] >= current_end) {
                if !self.advance() {
                    break;
                }
                continue;
            }

            let deadline = self.clock.instant_of(current_end) + guard;
            let now = Instant::now();
            if now >= deadline {
                self.stats.deadline_misses.fetch_add(1);
                if let Some(block) = self.current_block() {
                    error!(
                        "Station {}: block {} missed its deadline; emitting it with {} of {} samples present",
                        self.station,
                        block.id.seq,
                        block.num_present(),
                        block.len() * block.num_subbands(),
                    );
                }
                if !self.advance() {
                    break;
                }
                continue;
            }

            // Don't sleep through a stop request.
            let wait_until = deadline.min(now + POLL_INTERVAL);
            let mut sel = Select::new();
            for &b in &live_boards {
                sel.recv(queues[b].filled_receiver());
            }
            let Ok(op) = sel.select_deadline(wait_until) else {
                continue;
            };
            let b = live_boards[op.index()];
            match op.recv(queues[b].filled_receiver()) {
                Ok(Some(packet)) => {
                    // A board has only moved on as far as the open window;
                    // packets that weren't written say nothing.
                    if self.write_packet(&packet) == WriteOutcome::Written {
                        let window_end = self.config.block_begin(self.current + 2);
                        latest_end[b] = latest_end[b].max(packet.end().min(window_end));
                    }
                    queues[b].release(packet);
                }
                Ok(None) | Err(_) => {
                    debug!("Station {}: board {b} has ended", self.station);
                    live[b] = false;
                }
            }
        }
    }
}

fn spawn_reader(
    station: usize,
    mut reader: PacketReader,
    queue: BufferPool<Packet>,
    stop: Arc<AtomicCell<bool>>,
) -> BoardThread {
    let board = reader.board();
    let (exited_tx, exited_rx) = bounded::<()>(0);
    let handle = thread::Builder::new()
        .name(format!("reader-{station}-{board}"))
        .spawn(move || {
            let _exited = exited_tx;
            raise_thread_priority();

            let mut num_packets = 0_u64;
            while !stop.load() {
                let Some(mut packet) = queue.acquire() else {
                    break;
                };
                match reader.read_into(&mut packet) {
                    Ok(true) => {
                        num_packets += 1;
                        queue.publish(packet);
                    }
                    Ok(false) => {
                        queue.release(packet);
                        debug!("Station {station} board {board}: end of stream");
                        break;
                    }
                    Err(PacketError::TimedOut) => queue.release(packet),
                    Err(e) => {
                        queue.release(packet);
                        warn!("Station {station} board {board}: {e}; no more data will be read from this board");
                        break;
                    }
                }
            }
            queue.finish();
            debug!(
                "Station {station} board {board}: reader exiting after {} samples",
                num_packets * NUM_SAMPLES_PER_PACKET as u64
            );
        })
        .expect("OS can create threads");

    BoardThread {
        board,
        handle,
        exited: exited_rx,
    }
}

/// Wait for the readers, abandoning any that don't exit within `timeout` (e.g.
/// stuck on a hung link).
fn join_readers(station: usize, threads: Vec<BoardThread>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    for thread in threads {
        match thread.exited.recv_deadline(deadline) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Station {station} board {}: reader didn't exit within {timeout:?}; abandoning it",
                    thread.board
                );
            }
            _ => {
                if thread.handle.join().is_err() {
                    error!("Station {station} board {}: reader panicked", thread.board);
                }
            }
        }
    }
}
