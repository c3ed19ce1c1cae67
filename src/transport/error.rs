// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from moving blocks between stations and nodes.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Timed out")]
    TimedOut,

    #[error("The other end of the link from station {station} to node {node} has gone away")]
    Disconnected { node: usize, station: usize },

    #[error("There is no link from station {station} to node {node}")]
    NoSuchLink { node: usize, station: usize },

    #[error("Message doesn't start with the metadata magic bytes")]
    BadMagic,

    #[error("Unknown metadata kind {0}")]
    BadKind(u8),

    #[error("Metadata is truncated: {0}")]
    Truncated(#[from] std::io::Error),

    #[error("Metadata has a missing-sample range {begin}..{end} outside a block of {block_size} samples")]
    BadRange { begin: u32, end: u32, block_size: usize },

    #[error("Metadata describes subbands {got:?}, but subbands {expected:?} were expected")]
    UnexpectedSubbands {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Metadata from station {got} arrived on the link of station {expected}")]
    WrongStation { expected: usize, got: usize },

    #[error("Metadata says block {seq} begins at sample {got}, but it begins at {expected}")]
    WrongBegin { seq: u64, expected: u64, got: u64 },

    #[error("Payload is {got} bytes, but {expected} bytes were expected")]
    PayloadSize { expected: usize, got: usize },
}
