// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::time::{Duration, Instant};

use crossbeam_utils::atomic::AtomicCell;
use itertools::Itertools;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// The steps a block goes through on a compute node.
#[derive(Debug, Display, EnumIter, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Conversion of received samples and flags for the compute unit.
    #[strum(serialize = "transfer")]
    Transfer,

    #[strum(serialize = "channelize")]
    Channelize,

    #[strum(serialize = "phase correction")]
    PhaseCorrection,

    #[strum(serialize = "correlate")]
    Correlate,

    #[strum(serialize = "weighting")]
    Weighting,
}

/// Accumulated time spent in each [`Stage`], and the number of blocks that
/// failed. Can be read while the stage runs.
#[derive(Debug, Default)]
pub struct StageTimers {
    nanos: [AtomicCell<u64>; 5],
    failed_blocks: AtomicCell<u64>,
}

impl StageTimers {
    pub fn add(&self, stage: Stage, elapsed: Duration) {
        self.nanos[stage as usize].fetch_add(elapsed.as_nanos() as u64);
    }

    /// Run `f`, charging its time to `stage`.
    pub fn time<T>(&self, stage: Stage, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.add(stage, start.elapsed());
        result
    }

    pub fn elapsed(&self, stage: Stage) -> Duration {
        Duration::from_nanos(self.nanos[stage as usize].load())
    }

    pub(crate) fn add_failure(&self) {
        self.failed_blocks.fetch_add(1);
    }

    pub fn failed_blocks(&self) -> u64 {
        self.failed_blocks.load()
    }
}

impl std::fmt::Display for StageTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            Stage::iter()
                .map(|s| format!("{s} {:.3?}", self.elapsed(s)))
                .join(", ")
        )?;
        if self.failed_blocks() > 0 {
            write!(f, " ({} blocks failed)", self.failed_blocks())?;
        }
        Ok(())
    }
}
