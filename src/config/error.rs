// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from reading or checking a run configuration. All of these are
//! fatal, and are only ever raised before a pipeline starts.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Couldn't read the run configuration '{file}': {err}")]
    Read { file: PathBuf, err: std::io::Error },

    #[error("Couldn't parse the run configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("The sample rate must be positive; got {0}")]
    SampleRate(f64),

    #[error("The block size must be a positive number of samples")]
    ZeroBlockSize,

    #[error("The number of channels ({0}) must be a power of two")]
    ChannelsNotPowerOfTwo(usize),

    #[error("The block size ({block_size}) isn't a multiple of the number of channels ({num_channels})")]
    BlockNotMultipleOfChannels {
        block_size: usize,
        num_channels: usize,
    },

    #[error("The number of filter taps must be positive")]
    ZeroTaps,

    #[error("The pool size must be at least 3 (current, next and one in flight); got {0}")]
    PoolTooSmall(usize),

    #[error("The observation stops (sample {stop}) before it starts (sample {start})")]
    StopBeforeStart { start: u64, stop: u64 },

    #[error("There are no subbands in the observation")]
    NoSubbands,

    #[error("Station '{station}' has {num_boards} boards, but at most {max} are supported")]
    TooManyBoards {
        station: String,
        num_boards: usize,
        max: usize,
    },

    #[error("Station '{station}' lists {num_sources} board sources, but has {num_boards} boards")]
    SourceCount {
        station: String,
        num_sources: usize,
        num_boards: usize,
    },

    #[error("Station '{station}' maps {got} subbands, but the observation has {expected}")]
    BeamletCount {
        station: String,
        expected: usize,
        got: usize,
    },

    #[error("Station '{station}' maps subband {subband} to board {board}, which doesn't exist")]
    BoardOutOfRange {
        station: String,
        subband: usize,
        board: usize,
    },

    #[error("Station '{station}' maps subband {subband} to slot {slot}, but boards only have {num_slots} slots")]
    SlotOutOfRange {
        station: String,
        subband: usize,
        slot: usize,
        num_slots: usize,
    },

    #[error("Station '{station}': subbands {first} and {second} both claim board {board} slot {slot}")]
    DuplicateBeamlet {
        station: String,
        board: usize,
        slot: usize,
        first: usize,
        second: usize,
    },

    #[error("Node '{node}' is assigned subband {subband}, which doesn't exist")]
    NodeSubbandOutOfRange { node: String, subband: usize },

    #[error("Subband {subband} is assigned to both node '{first}' and node '{second}'")]
    SubbandAssignedTwice {
        subband: usize,
        first: String,
        second: String,
    },

    #[error("Subband {0} isn't assigned to any node")]
    SubbandUnassigned(usize),
}
