// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

Anything describing the station hardware (packet layout) is fixed here; the
rest of the run's parameters live in [`crate::RunConfig`].
 */

pub use std::f64::consts::{PI, TAU};

/// Every station packet carries this many time samples per beamlet.
pub const NUM_SAMPLES_PER_PACKET: usize = 16;

/// Dual-polarisation receivers (X and Y).
pub const NUM_POLARISATIONS: usize = 2;

/// The only supported station packet version.
pub const PACKET_VERSION: u8 = 3;

/// The size of a station packet header \[bytes\].
pub const PACKET_HEADER_SIZE: usize = 16;

/// The largest number of boards a station can have; the board ID in a packet
/// header is 5 bits.
pub const MAX_NUM_BOARDS: usize = 32;

/// Visibilities are scaled by this number divided by the number of valid
/// samples that contributed to them.
pub const WEIGHT_NORMALISATION: f32 = 1.0e-6;

/// The default number of blocks per station that are allocated up front.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// The default number of taps of the channelisation filter.
pub const DEFAULT_NUM_TAPS: usize = 16;

/// The default extra wall-clock time the real-time assembler waits after the
/// end of a block before giving up on late packets \[milliseconds\].
pub const DEFAULT_GUARD_INTERVAL_MS: u64 = 100;

/// The default time a receiver waits for a station's contribution to a block
/// \[milliseconds\].
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 5_000;

/// The default time given to a board reader to exit during shutdown
/// \[milliseconds\].
pub const DEFAULT_READER_SHUTDOWN_TIMEOUT_MS: u64 = 1_000;

/// How long blocking waits sleep before re-checking a stop flag.
pub(crate) const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);
