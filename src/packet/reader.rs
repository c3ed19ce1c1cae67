// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{io::ErrorKind, sync::Arc, time::Duration};

use log::warn;

use super::{Packet, PacketError, PacketHeader, PacketSource};
use crate::{assemble::AssemblerStats, config::SampleBits, misc::RateLimited};

/// Reads and checks the packets of one board.
pub struct PacketReader {
    board: usize,
    sample_bits: SampleBits,
    num_slots: usize,
    source: Box<dyn PacketSource>,
    buf: Vec<u8>,
    stats: Arc<AssemblerStats>,
    invalid_warning: RateLimited,
}

impl PacketReader {
    pub fn new(
        board: usize,
        sample_bits: SampleBits,
        num_slots: usize,
        source: Box<dyn PacketSource>,
        stats: Arc<AssemblerStats>,
    ) -> PacketReader {
        PacketReader {
            board,
            sample_bits,
            num_slots,
            source,
            buf: vec![],
            stats,
            invalid_warning: RateLimited::new(Duration::from_secs(10)),
        }
    }

    pub fn board(&self) -> usize {
        self.board
    }

    /// Read the next good packet into `packet`. Invalid packets and packets
    /// flagged with a payload error are counted and skipped.
    ///
    /// `Ok(false)` means that the stream has ended. [`PacketError::TimedOut`]
    /// means that nothing arrived in time; any other error means that the
    /// stream is broken.
    pub fn read_into(&mut self, packet: &mut Packet) -> Result<bool, PacketError> {
        loop {
            match self.source.read_packet(&mut self.buf) {
                Ok(true) => (),
                Ok(false) => return Ok(false),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(PacketError::TimedOut)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(PacketError::Io(e)),
            }
            self.stats.packets_received.fetch_add(1);

            match self.check(packet) {
                Ok(()) if packet.header.payload_error => {
                    self.stats.payload_errors.fetch_add(1);
                }
                Ok(()) => return Ok(true),
                Err(e) => {
                    self.stats.invalid_packets.fetch_add(1);
                    if let Some(suppressed) = self.invalid_warning.check() {
                        warn!(
                            "Board {}: discarding invalid packet: {e} ({suppressed} similar messages suppressed)",
                            self.board
                        );
                    }
                }
            }
        }
    }

    /// Read the next good packet into a new allocation. `Ok(None)` means that
    /// the stream has ended.
    pub fn read(&mut self) -> Result<Option<Packet>, PacketError> {
        let mut packet = Packet::new(PacketHeader {
            board: self.board,
            payload_error: false,
            sample_bits: self.sample_bits,
            num_beamlets: self.num_slots,
            timestamp: 0,
        });
        Ok(self.read_into(&mut packet)?.then_some(packet))
    }

    fn check(&self, packet: &mut Packet) -> Result<(), PacketError> {
        packet.decode_into(&self.buf)?;
        let header = &packet.header;
        if header.sample_bits != self.sample_bits {
            return Err(PacketError::UnexpectedBitMode {
                expected: self.sample_bits,
                got: header.sample_bits,
            });
        }
        if header.board != self.board {
            return Err(PacketError::WrongBoard {
                expected: self.board,
                got: header.board,
            });
        }
        if header.num_beamlets > self.num_slots {
            return Err(PacketError::TooManyBeamlets {
                got: header.num_beamlets,
                max: self.num_slots,
            });
        }
        Ok(())
    }
}
