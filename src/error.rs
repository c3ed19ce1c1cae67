// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all errors that stop a pipeline from starting.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Station {station} doesn't exist; the configuration has {num_stations} stations")]
    StationOutOfRange { station: usize, num_stations: usize },

    #[error("Node {node} doesn't exist; the configuration has {num_nodes} nodes")]
    NodeOutOfRange { node: usize, num_nodes: usize },

    #[error("Station {station} has {num_boards} boards, but {num_sources} packet sources were given")]
    SourceCount {
        station: usize,
        num_boards: usize,
        num_sources: usize,
    },

    #[error("{0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("{0}")]
    Packet(#[from] crate::packet::PacketError),

    #[error("{0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("{0}")]
    Compute(#[from] crate::correlator::ComputeError),
}
