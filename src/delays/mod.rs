// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Per-station geometric delays.

A [`DelayModel`] knows the delay of every station at any time. The station
pipeline samples it at the boundaries of every block on a background thread
([`DelayTimeline`]), a couple of blocks ahead of the assembler, so that the
assembler never waits for it.
 */


use std::{sync::Arc, thread};

use log::{debug, trace};
use ndarray::prelude::*;

use crate::{config::RunConfig, constants::NUM_POLARISATIONS, pool::BufferPool};

/// The delay of one polarisation of one station.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Delay {
    /// \[seconds\]
    pub delay: f64,

    /// \[radians\]
    pub phase: f64,
}

/// The delays at the start of a block and just after its end, for each
/// station and polarisation. The dimensions of both arrays are
/// [station][pol].
#[derive(Debug, Clone, PartialEq)]
pub struct DelaySet {
    pub begin: Array2<Delay>,
    pub after_end: Array2<Delay>,
}

impl DelaySet {
    pub fn zeros(num_stations: usize) -> DelaySet {
        DelaySet {
            begin: Array2::default((num_stations, NUM_POLARISATIONS)),
            after_end: Array2::default((num_stations, NUM_POLARISATIONS)),
        }
    }

    pub fn num_stations(&self) -> usize {
        self.begin.len_of(Axis(0))
    }

    /// Set every delay to zero.
    pub fn clear(&mut self) {
        self.begin.fill(Delay::default());
        self.after_end.fill(Delay::default());
    }

    /// The delay of `station` and `pol` a fraction `frac` (0 at the start, 1
    /// just after the end) of the way through the block, interpolated
    /// linearly.
    pub fn interpolate(&self, station: usize, pol: usize, frac: f64) -> Delay {
        let b = self.begin[(station, pol)];
        let e = self.after_end[(station, pol)];
        Delay {
            delay: b.delay + (e.delay - b.delay) * frac,
            phase: b.phase + (e.phase - b.phase) * frac,
        }
    }
}

/// Anything that can provide station delays.
pub trait DelayModel: Send {
    /// The delay of `pol` of `station` at absolute sample timestamp `sample`.
    fn delay(&self, station: usize, pol: usize, sample: u64) -> Delay;
}

/// Delays that never change, e.g. cable delays.
#[derive(Debug, Clone)]
pub struct FixedDelays {
    /// [station][pol] \[seconds\]
    delays_s: Vec<[f64; NUM_POLARISATIONS]>,
}

impl FixedDelays {
    pub fn new(delays_s: Vec<[f64; NUM_POLARISATIONS]>) -> FixedDelays {
        FixedDelays { delays_s }
    }

    /// The fixed delays listed with each station of `config`.
    pub fn from_config(config: &RunConfig) -> FixedDelays {
        FixedDelays::new(config.stations.iter().map(|s| s.fixed_delays_s).collect())
    }
}

impl DelayModel for FixedDelays {
    fn delay(&self, station: usize, pol: usize, _sample: u64) -> Delay {
        Delay {
            delay: self.delays_s.get(station).map(|d| d[pol]).unwrap_or(0.0),
            phase: 0.0,
        }
    }
}

/// Produces one station's [`DelaySet`]s, in block order, on its own thread.
///
/// Two sets are in flight at any time: one being filled, the other waiting to
/// be taken by the assembler.
pub struct DelayTimeline {
    pool: BufferPool<DelaySet>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DelayTimeline {
    pub fn start(
        config: Arc<RunConfig>,
        station: usize,
        model: Box<dyn DelayModel>,
    ) -> DelayTimeline {
        let pool = BufferPool::new(&format!("delays-{station}"), 2, || DelaySet::zeros(1));
        let producer = pool.clone();
        let handle = thread::Builder::new()
            .name(format!("delays-{station}"))
            .spawn(move || {
                let num_blocks = config.num_blocks();
                let block_size = config.block_size as u64;
                let mut seq = 0;
                while num_blocks.map(|n| seq < n).unwrap_or(true) {
                    let Some(mut set) = producer.acquire() else {
                        break;
                    };
                    let begin = config.block_begin(seq);
                    for pol in 0..NUM_POLARISATIONS {
                        set.begin[(0, pol)] = model.delay(station, pol, begin);
                        set.after_end[(0, pol)] = model.delay(station, pol, begin + block_size);
                    }
                    trace!("Station {station}: delays for block {seq} ready");
                    producer.publish(set);
                    seq += 1;
                }
                producer.finish();
                debug!("Station {station}: delay timeline finished after {seq} blocks");
            })
            .expect("OS can create threads");

        DelayTimeline {
            pool,
            handle: Some(handle),
        }
    }

    /// Copy the next block's delays into `dst` (the station's row). If the
    /// timeline has ended, `dst` is zeroed and `false` returned.
    pub fn next_into(&self, dst: &mut DelaySet) -> bool {
        match self.pool.consume() {
            Some(set) => {
                dst.begin.row_mut(0).assign(&set.begin.row(0));
                dst.after_end.row_mut(0).assign(&set.after_end.row(0));
                self.pool.release(set);
                true
            }
            None => {
                dst.clear();
                false
            }
        }
    }

    /// Stop the background thread and wait for it.
    pub fn stop(mut self) {
        self.pool.shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("The delay timeline thread panicked");
            }
        }
    }
}

impl Drop for DelayTimeline {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}
