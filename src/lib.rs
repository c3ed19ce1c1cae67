// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The real-time data path of a radio-telescope correlator.

Station sample packets are read from the network, assembled into
time-aligned blocks with per-subband validity flags and per-station delays,
redistributed across compute nodes and correlated into flagged, weighted
visibilities.
 */

pub mod assemble;
pub mod block;
pub mod config;
pub mod constants;
pub mod correlator;
pub mod delays;
mod error;
pub mod flags;
mod jones;
mod logging;
pub(crate) mod math;
mod misc;
pub mod packet;
pub mod pipeline;
pub mod pool;
pub mod remap;
pub mod transport;

#[cfg(test)]
mod tests;

// Re-exports.
pub use assemble::{AssemblerCounts, AssemblerStats, BlockAssembler, SampleClock};
pub use block::{BlockId, SampleBlock};
pub use config::{AssemblyMode, RunConfig, SampleBits};
pub use correlator::{
    ComputeError, ComputeUnit, CorrelatedBlock, CorrelatorStage, CpuComputeUnit, Stage,
    StageTimers, SubbandVisibilities,
};
pub use delays::{Delay, DelayModel, DelaySet, DelayTimeline, FixedDelays};
pub use error::PipelineError;
pub use flags::FlagSet;
pub use jones::Jones;
pub use logging::{display_build_info, setup_logging};
pub use packet::{Packet, PacketHeader, PacketReader, PacketSource};
pub use pipeline::{NodePipeline, NodeReport, StationPipeline, StationReport};
pub use pool::BufferPool;
pub use remap::BeamletRemapper;
pub use transport::{LocalTransport, Outbox, Transport};

#[allow(non_camel_case_types)]
pub type c32 = num_complex::Complex<f32>;
