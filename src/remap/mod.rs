// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mapping of physical (board, slot) beamlet positions to observation
//! subbands.

use crate::config::{ConfigError, StationConfig};

/// The beamlet table of one station. It is built once, before anything
/// starts, and only read afterwards, so it can be shared freely between
/// threads.
#[derive(Debug, Clone)]
pub struct BeamletRemapper {
    num_boards: usize,
    num_slots: usize,

    /// Indexed by `board * num_slots + slot`. `None` means that the position
    /// carries nothing this observation wants.
    table: Vec<Option<usize>>,
}

impl BeamletRemapper {
    /// Build the table for `station`. Every subband must map to a position
    /// that exists, and no two subbands may claim the same position.
    pub fn new(
        station: &StationConfig,
        num_subbands: usize,
        num_slots_per_board: usize,
    ) -> Result<BeamletRemapper, ConfigError> {
        if station.beamlets.len() != num_subbands {
            return Err(ConfigError::BeamletCount {
                station: station.name.clone(),
                expected: num_subbands,
                got: station.beamlets.len(),
            });
        }

        let mut table = vec![None; station.num_boards * num_slots_per_board];
        for (subband, &(board, slot)) in station.beamlets.iter().enumerate() {
            if board >= station.num_boards {
                return Err(ConfigError::BoardOutOfRange {
                    station: station.name.clone(),
                    subband,
                    board,
                });
            }
            if slot >= num_slots_per_board {
                return Err(ConfigError::SlotOutOfRange {
                    station: station.name.clone(),
                    subband,
                    slot,
                    num_slots: num_slots_per_board,
                });
            }

            let entry = &mut table[board * num_slots_per_board + slot];
            if let Some(first) = *entry {
                return Err(ConfigError::DuplicateBeamlet {
                    station: station.name.clone(),
                    board,
                    slot,
                    first,
                    second: subband,
                });
            }
            *entry = Some(subband);
        }

        Ok(BeamletRemapper {
            num_boards: station.num_boards,
            num_slots: num_slots_per_board,
            table,
        })
    }

    /// The subband carried by `slot` of `board`, if any. Positions outside
    /// the board layout carry nothing.
    #[inline]
    pub fn subband(&self, board: usize, slot: usize) -> Option<usize> {
        if board >= self.num_boards || slot >= self.num_slots {
            return None;
        }
        self.table[board * self.num_slots + slot]
    }

    /// All subbands carried by `board`, in slot order.
    pub fn board_subbands(&self, board: usize) -> Vec<usize> {
        (0..self.num_slots)
            .filter_map(|slot| self.subband(board, slot))
            .collect()
    }

    pub fn num_boards(&self) -> usize {
        self.num_boards
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }
}
