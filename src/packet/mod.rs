// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Station packets: the wire format, where packets come from, and reading them
one board at a time.

Every packet starts with a 16-byte little-endian header:

| offset | size | field                                              |
|--------|------|----------------------------------------------------|
| 0      | 1    | version (3)                                        |
| 1      | 1    | bits 0-4: board ID, bit 6: payload error           |
| 2      | 1    | bit mode: 0 = 16-bit, 1 = 8-bit, 2 = 4-bit         |
| 3      | 1    | number of beamlets                                 |
| 4      | 1    | samples per beamlet (16)                           |
| 5      | 3    | reserved                                           |
| 8      | 8    | absolute timestamp of the first sample             |

followed by the samples, ordered [beamlet][sample][pol].
 */

mod error;
mod reader;
mod source;
#[cfg(test)]
mod tests;

pub use error::PacketError;
pub use reader::PacketReader;
pub use source::{open_source, PacketSource, ReaderSource, UdpSource, VecSource};

use byteorder::{ByteOrder, LittleEndian};
use ndarray::prelude::*;
use num_complex::Complex;

use crate::{config::SampleBits, constants::*};

const BOARD_MASK: u8 = 0x1f;
const PAYLOAD_ERROR_BIT: u8 = 1 << 6;

/// The largest packet that can be described by a header.
pub(crate) const MAX_PACKET_SIZE: usize =
    PACKET_HEADER_SIZE + u8::MAX as usize * NUM_SAMPLES_PER_PACKET * NUM_POLARISATIONS * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub board: usize,

    /// Set by the station when the payload is known to be bad.
    pub payload_error: bool,

    pub sample_bits: SampleBits,

    pub num_beamlets: usize,

    /// The absolute sample timestamp of the first sample.
    pub timestamp: u64,
}

impl PacketHeader {
    /// Parse and check the fixed fields of a header.
    pub fn parse(bytes: &[u8]) -> Result<PacketHeader, PacketError> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(PacketError::TooShort(bytes.len()));
        }
        if bytes[0] != PACKET_VERSION {
            return Err(PacketError::BadVersion(bytes[0]));
        }
        if bytes[4] as usize != NUM_SAMPLES_PER_PACKET {
            return Err(PacketError::BadSamplesPerBeamlet(bytes[4]));
        }
        let sample_bits =
            SampleBits::from_header_code(bytes[2]).ok_or(PacketError::BadBitMode(bytes[2]))?;

        Ok(PacketHeader {
            board: (bytes[1] & BOARD_MASK) as usize,
            payload_error: bytes[1] & PAYLOAD_ERROR_BIT != 0,
            sample_bits,
            num_beamlets: bytes[3] as usize,
            timestamp: LittleEndian::read_u64(&bytes[8..16]),
        })
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut header = [0; PACKET_HEADER_SIZE];
        header[0] = PACKET_VERSION;
        header[1] = (self.board as u8 & BOARD_MASK)
            | if self.payload_error {
                PAYLOAD_ERROR_BIT
            } else {
                0
            };
        header[2] = self.sample_bits.header_code();
        header[3] = self.num_beamlets as u8;
        header[4] = NUM_SAMPLES_PER_PACKET as u8;
        LittleEndian::write_u64(&mut header[8..16], self.timestamp);
        buf.extend_from_slice(&header);
    }

    /// The size of the payload following this header \[bytes\].
    pub fn payload_size(&self) -> usize {
        self.num_beamlets
            * NUM_SAMPLES_PER_PACKET
            * NUM_POLARISATIONS
            * self.sample_bits.bytes_per_sample()
    }
}

/// A decoded packet. Samples of every bit mode are widened to 16 bits.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,

    /// The dimensions are [beamlet][sample][pol].
    pub samples: Array3<Complex<i16>>,
}

impl Packet {
    /// A packet with all samples zero.
    pub fn new(header: PacketHeader) -> Packet {
        Packet {
            header,
            samples: Array3::zeros((
                header.num_beamlets,
                NUM_SAMPLES_PER_PACKET,
                NUM_POLARISATIONS,
            )),
        }
    }

    /// The timestamp of the first sample.
    pub fn begin(&self) -> u64 {
        self.header.timestamp
    }

    /// The timestamp just after the last sample.
    pub fn end(&self) -> u64 {
        self.header.timestamp + NUM_SAMPLES_PER_PACKET as u64
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet, PacketError> {
        let header = PacketHeader::parse(bytes)?;
        let mut packet = Packet::new(header);
        packet.decode_payload(&bytes[PACKET_HEADER_SIZE..])?;
        Ok(packet)
    }

    /// Decode `bytes` into this packet, reusing its sample buffer where
    /// possible.
    pub fn decode_into(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        let header = PacketHeader::parse(bytes)?;
        if header.num_beamlets != self.samples.len_of(Axis(0)) {
            self.samples = Array3::zeros((
                header.num_beamlets,
                NUM_SAMPLES_PER_PACKET,
                NUM_POLARISATIONS,
            ));
        }
        self.header = header;
        self.decode_payload(&bytes[PACKET_HEADER_SIZE..])
    }

    fn decode_payload(&mut self, payload: &[u8]) -> Result<(), PacketError> {
        let expected = self.header.payload_size();
        if payload.len() != expected {
            return Err(PacketError::PayloadSize {
                expected,
                got: payload.len(),
            });
        }

        // The payload has the same ordering as the samples array.
        let samples = self.samples.iter_mut();
        match self.header.sample_bits {
            SampleBits::Sixteen => {
                for (s, bytes) in samples.zip(payload.chunks_exact(4)) {
                    *s = Complex::new(
                        LittleEndian::read_i16(&bytes[0..2]),
                        LittleEndian::read_i16(&bytes[2..4]),
                    );
                }
            }
            SampleBits::Eight => {
                for (s, bytes) in samples.zip(payload.chunks_exact(2)) {
                    *s = Complex::new(bytes[0] as i8 as i16, bytes[1] as i8 as i16);
                }
            }
            SampleBits::Four => {
                for (s, &byte) in samples.zip(payload) {
                    // Shift each nibble to the top of the byte, then back down
                    // to sign-extend it.
                    let re = ((byte << 4) as i8) >> 4;
                    let im = (byte as i8) >> 4;
                    *s = Complex::new(re as i16, im as i16);
                }
            }
        }
        Ok(())
    }

    /// Encode the packet as it would appear on the wire. Samples that don't
    /// fit the header's bit mode are truncated.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKET_HEADER_SIZE + self.header.payload_size());
        self.header.write(&mut buf);
        match self.header.sample_bits {
            SampleBits::Sixteen => {
                let mut bytes = [0; 2];
                for s in &self.samples {
                    LittleEndian::write_i16(&mut bytes, s.re);
                    buf.extend_from_slice(&bytes);
                    LittleEndian::write_i16(&mut bytes, s.im);
                    buf.extend_from_slice(&bytes);
                }
            }
            SampleBits::Eight => {
                for s in &self.samples {
                    buf.push(s.re as i8 as u8);
                    buf.push(s.im as i8 as u8);
                }
            }
            SampleBits::Four => {
                for s in &self.samples {
                    buf.push((s.re as u8 & 0x0f) | ((s.im as u8 & 0x0f) << 4));
                }
            }
        }
        buf
    }
}
