// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from reading station packets.

use thiserror::Error;

use crate::{config::SampleBits, constants::*};

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("Packet is {0} bytes, which is too short for a header ({PACKET_HEADER_SIZE} bytes)")]
    TooShort(usize),

    #[error("Packet version {0} isn't supported; only version {PACKET_VERSION} is")]
    BadVersion(u8),

    #[error("Packet has {0} samples per beamlet; expected {NUM_SAMPLES_PER_PACKET}")]
    BadSamplesPerBeamlet(u8),

    #[error("Packet has an unknown bit mode code {0}")]
    BadBitMode(u8),

    #[error("Packet carries {got} samples, but the run uses {expected} samples")]
    UnexpectedBitMode { expected: SampleBits, got: SampleBits },

    #[error("Packet is from board {got}, but this stream belongs to board {expected}")]
    WrongBoard { expected: usize, got: usize },

    #[error("Packet has {got} beamlets, but boards only have {max} slots")]
    TooManyBeamlets { got: usize, max: usize },

    #[error("Packet payload is {got} bytes; its header implies {expected} bytes")]
    PayloadSize { expected: usize, got: usize },

    #[error("Timed out waiting for a packet")]
    TimedOut,

    #[error("Unrecognised packet source '{0}'; expected 'udp:<address>' or 'file:<path>'")]
    UnknownSource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PacketError {
    /// Is this a problem with one packet (rather than with the stream)? Such
    /// packets are counted and skipped.
    pub fn is_invalid_packet(&self) -> bool {
        !matches!(
            self,
            PacketError::TimedOut | PacketError::UnknownSource(_) | PacketError::Io(_)
        )
    }
}
