// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The static configuration of a run.
//!
//! A [`RunConfig`] is read (or built) once, validated with
//! [`RunConfig::validate`], and then shared read-only (`Arc<RunConfig>`) with
//! every component. Nothing in it changes while a pipeline runs.

mod error;

pub use error::ConfigError;

use std::{collections::HashMap, path::Path, time::Duration};

use log::debug;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use vec1::Vec1;

use crate::{constants::*, remap::BeamletRemapper};

/// How packets are assembled into blocks.
#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssemblyMode {
    /// Every board is read concurrently and blocks are emitted by a
    /// wall-clock deadline, complete or not.
    #[strum(serialize = "real-time")]
    RealTime,

    /// Boards are read one at a time in timestamp order. Nothing is lost, but
    /// there is no bound on latency.
    #[strum(serialize = "batch")]
    Batch,
}

/// The width of each component of a complex sample on the wire.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SampleBits {
    #[strum(serialize = "4-bit")]
    Four,
    #[strum(serialize = "8-bit")]
    Eight,
    #[strum(serialize = "16-bit")]
    Sixteen,
}

impl SampleBits {
    /// The number of bytes one complex sample occupies on the wire.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleBits::Four => 1,
            SampleBits::Eight => 2,
            SampleBits::Sixteen => 4,
        }
    }

    /// The code used for this mode in packet headers.
    pub fn header_code(self) -> u8 {
        match self {
            SampleBits::Sixteen => 0,
            SampleBits::Eight => 1,
            SampleBits::Four => 2,
        }
    }

    pub fn from_header_code(code: u8) -> Option<SampleBits> {
        match code {
            0 => Some(SampleBits::Sixteen),
            1 => Some(SampleBits::Eight),
            2 => Some(SampleBits::Four),
            _ => None,
        }
    }
}

impl TryFrom<u8> for SampleBits {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            4 => Ok(SampleBits::Four),
            8 => Ok(SampleBits::Eight),
            16 => Ok(SampleBits::Sixteen),
            _ => Err(format!("unsupported sample width {bits}; use 4, 8 or 16")),
        }
    }
}

impl From<SampleBits> for u8 {
    fn from(bits: SampleBits) -> u8 {
        match bits {
            SampleBits::Four => 4,
            SampleBits::Eight => 8,
            SampleBits::Sixteen => 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub name: String,

    /// The number of boards (physical input streams) of this station.
    pub num_boards: usize,

    /// Where each board's packets come from (see
    /// [`crate::packet::open_source`]). May be empty if the caller supplies
    /// the sources itself.
    #[serde(default)]
    pub sources: Vec<String>,

    /// For each subband of the observation, the (board, slot) it is read
    /// from.
    pub beamlets: Vec<(usize, usize)>,

    /// Fixed per-polarisation (X, Y) delays of this station \[seconds\], e.g.
    /// cable delays.
    #[serde(default)]
    pub fixed_delays_s: [f64; NUM_POLARISATIONS],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,

    /// The (observation) subband indices this node correlates.
    pub subbands: Vec<usize>,
}

fn default_guard_interval_ms() -> u64 {
    DEFAULT_GUARD_INTERVAL_MS
}

fn default_num_channels() -> usize {
    1
}

fn default_num_taps() -> usize {
    DEFAULT_NUM_TAPS
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_receive_timeout_ms() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT_MS
}

fn default_reader_shutdown_timeout_ms() -> u64 {
    DEFAULT_READER_SHUTDOWN_TIMEOUT_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// The rate of samples in each subband \[Hz\]. Absolute sample timestamps
    /// count samples at this rate since the UNIX epoch.
    pub sample_rate_hz: f64,

    /// The number of samples in a block.
    pub block_size: usize,

    pub sample_bits: SampleBits,

    pub mode: AssemblyMode,

    /// The absolute sample timestamp of the start of the first block. Every
    /// block begins a multiple of `block_size` after this.
    pub start_sample: u64,

    /// The absolute sample timestamp at which the observation ends. Without
    /// it, the run continues until the inputs end or it is stopped.
    #[serde(default)]
    pub stop_sample: Option<u64>,

    /// The extra time the real-time assembler waits for packets after the end
    /// of a block.
    #[serde(default = "default_guard_interval_ms")]
    pub guard_interval_ms: u64,

    /// The number of channels each subband is split into on the compute
    /// nodes.
    #[serde(default = "default_num_channels")]
    pub num_channels: usize,

    /// The number of taps of the channelisation filter.
    #[serde(default = "default_num_taps")]
    pub num_taps: usize,

    /// The number of blocks allocated for each station.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long a receiver waits for a station's contribution to a block.
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// How long a real-time board reader gets to exit during shutdown before
    /// it is abandoned.
    #[serde(default = "default_reader_shutdown_timeout_ms")]
    pub reader_shutdown_timeout_ms: u64,

    /// The number of beamlet slots on each board.
    pub num_slots_per_board: usize,

    /// The centre frequency of every subband of the observation \[Hz\].
    pub subband_frequencies_hz: Vec<f64>,

    pub stations: Vec1<StationConfig>,

    pub nodes: Vec1<NodeConfig>,
}

impl RunConfig {
    /// Parse and validate a configuration.
    pub fn from_toml_str(s: &str) -> Result<RunConfig, ConfigError> {
        let config: RunConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn read_file<P: AsRef<Path>>(file: P) -> Result<RunConfig, ConfigError> {
        let file = file.as_ref();
        debug!("Reading run configuration {}", file.display());
        let contents = std::fs::read_to_string(file).map_err(|err| ConfigError::Read {
            file: file.to_path_buf(),
            err,
        })?;
        RunConfig::from_toml_str(&contents)
    }

    /// Check that everything in the configuration is consistent. Nothing
    /// should be started with a configuration that fails this.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate_hz.is_nan() || self.sample_rate_hz <= 0.0 {
            return Err(ConfigError::SampleRate(self.sample_rate_hz));
        }
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if !self.num_channels.is_power_of_two() {
            return Err(ConfigError::ChannelsNotPowerOfTwo(self.num_channels));
        }
        if self.block_size % self.num_channels != 0 {
            return Err(ConfigError::BlockNotMultipleOfChannels {
                block_size: self.block_size,
                num_channels: self.num_channels,
            });
        }
        if self.num_taps == 0 {
            return Err(ConfigError::ZeroTaps);
        }
        if self.pool_size < 3 {
            return Err(ConfigError::PoolTooSmall(self.pool_size));
        }
        if let Some(stop) = self.stop_sample {
            if stop <= self.start_sample {
                return Err(ConfigError::StopBeforeStart {
                    start: self.start_sample,
                    stop,
                });
            }
        }
        if self.subband_frequencies_hz.is_empty() {
            return Err(ConfigError::NoSubbands);
        }

        for station in &self.stations {
            if station.num_boards > MAX_NUM_BOARDS {
                return Err(ConfigError::TooManyBoards {
                    station: station.name.clone(),
                    num_boards: station.num_boards,
                    max: MAX_NUM_BOARDS,
                });
            }
            if !station.sources.is_empty() && station.sources.len() != station.num_boards {
                return Err(ConfigError::SourceCount {
                    station: station.name.clone(),
                    num_sources: station.sources.len(),
                    num_boards: station.num_boards,
                });
            }
            // Building the table catches everything wrong with the beamlets.
            BeamletRemapper::new(station, self.num_subbands(), self.num_slots_per_board)?;
        }

        let mut owners: HashMap<usize, &str> = HashMap::new();
        for node in &self.nodes {
            for &subband in &node.subbands {
                if subband >= self.num_subbands() {
                    return Err(ConfigError::NodeSubbandOutOfRange {
                        node: node.name.clone(),
                        subband,
                    });
                }
                if let Some(first) = owners.insert(subband, &node.name) {
                    return Err(ConfigError::SubbandAssignedTwice {
                        subband,
                        first: first.to_string(),
                        second: node.name.clone(),
                    });
                }
            }
        }
        if let Some(subband) = (0..self.num_subbands()).find(|sb| !owners.contains_key(sb)) {
            return Err(ConfigError::SubbandUnassigned(subband));
        }

        Ok(())
    }

    pub fn num_subbands(&self) -> usize {
        self.subband_frequencies_hz.len()
    }

    pub fn num_stations(&self) -> usize {
        self.stations.len()
    }

    /// The number of cross- and auto-correlation baselines.
    pub fn num_baselines(&self) -> usize {
        crate::math::num_baselines(self.num_stations())
    }

    /// The number of time samples per channel in one block.
    pub fn samples_per_channel(&self) -> usize {
        self.block_size / self.num_channels
    }

    /// The absolute sample timestamp of the start of block `seq`.
    pub fn block_begin(&self, seq: u64) -> u64 {
        self.start_sample + seq * self.block_size as u64
    }

    /// The sequence number of the block containing absolute sample `sample`,
    /// or `None` if the sample is before the start of the observation.
    pub fn block_containing(&self, sample: u64) -> Option<u64> {
        sample
            .checked_sub(self.start_sample)
            .map(|offset| offset / self.block_size as u64)
    }

    /// The number of blocks in the observation, if it has a stop time. A
    /// final block that is cut short by the stop time still counts.
    pub fn num_blocks(&self) -> Option<u64> {
        self.stop_sample.map(|stop| {
            let len = stop - self.start_sample;
            len.div_ceil(self.block_size as u64)
        })
    }

    /// The (observation) subbands that `node` correlates, in ascending order.
    pub fn node_subbands(&self, node: usize) -> Vec<usize> {
        let mut subbands = self.nodes[node].subbands.clone();
        subbands.sort_unstable();
        subbands
    }

    pub fn guard_interval(&self) -> Duration {
        Duration::from_millis(self.guard_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn reader_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.reader_shutdown_timeout_ms)
    }
}
