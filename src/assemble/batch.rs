// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Batch assembly: boards are read on the calling thread in timestamp order.
//! Nothing is dropped for being slow, so this suits recordings.

use crossbeam_utils::atomic::AtomicCell;
use log::{debug, warn};

use super::BlockAssembler;
use crate::packet::{Packet, PacketError, PacketHeader, PacketReader};

impl BlockAssembler {
    pub(super) fn run_batch(&mut self, mut readers: Vec<PacketReader>) {
        // The oldest unread packet of each board; `None` once a board has
        // ended.
        let mut heads: Vec<Option<Packet>> = readers
            .iter_mut()
            .map(|reader| {
                let packet = Packet::new(PacketHeader {
                    board: reader.board(),
                    payload_error: false,
                    sample_bits: self.config.sample_bits,
                    num_beamlets: self.config.num_slots_per_board,
                    timestamp: 0,
                });
                read_head(self.station, &self.stop, reader, packet)
            })
            .collect();

        loop {
            if self.stop.load() {
                debug!("Station {}: stop requested", self.station);
                // Packets already read still count.
                for packet in heads.iter_mut().filter_map(Option::take) {
                    self.write_packet(&packet);
                }
                return;
            }
            let oldest = heads
                .iter()
                .enumerate()
                .filter_map(|(b, head)| head.as_ref().map(|p| (b, p.begin())))
                .min_by_key(|&(_, t)| t);
            let Some((b, timestamp)) = oldest else {
                debug!("Station {}: every board has ended", self.station);
                return;
            };

            // Nothing older than `timestamp` will be read any more, so every
            // block ending at or before it is done.
            loop {
                match self.current_end() {
                    None => {
                        debug!("Station {}: observation over", self.station);
                        return;
                    }
                    Some(end) if timestamp >= end => {
                        if !self.advance() {
                            return;
                        }
                    }
                    Some(_) => break,
                }
            }

            let Some(packet) = heads[b].take() else {
                continue;
            };
            self.write_packet(&packet);
            heads[b] = read_head(self.station, &self.stop, &mut readers[b], packet);
        }
    }
}

/// Read the next good packet of a board into `packet`. `None` means that the
/// board has no more data.
fn read_head(
    station: usize,
    stop: &AtomicCell<bool>,
    reader: &mut PacketReader,
    mut packet: Packet,
) -> Option<Packet> {
    while !stop.load() {
        match reader.read_into(&mut packet) {
            Ok(true) => return Some(packet),
            Ok(false) => {
                debug!("Station {station} board {}: end of stream", reader.board());
                return None;
            }
            Err(PacketError::TimedOut) => continue,
            Err(e) => {
                warn!(
                    "Station {station} board {}: {e}; no more data will be read from this board",
                    reader.board()
                );
                return None;
            }
        }
    }
    None
}
