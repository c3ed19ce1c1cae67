// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_utils::atomic::AtomicCell;
use log::{debug, info};
use scopeguard::defer_on_unwind;

use super::{check_config, join_thread, StopFlag};
use crate::{
    assemble::{block_pool, AssemblerCounts, AssemblerStats, BlockAssembler},
    block::SampleBlock,
    config::RunConfig,
    delays::{DelayModel, DelayTimeline, FixedDelays},
    error::PipelineError,
    misc::raise_thread_priority,
    packet::{open_source, PacketReader, PacketSource},
    pool::BufferPool,
    transport::{Distributor, Outbox},
};

/// What a station pipeline did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationReport {
    pub counts: AssemblerCounts,
    pub blocks_sent: u64,
}

/// One station's assembler and distributor.
pub struct StationPipeline {
    station: usize,
    stats: Arc<AssemblerStats>,
    stop: StopFlag,
    blocks: BufferPool<SampleBlock>,
    assembler: Option<JoinHandle<AssemblerCounts>>,
    distributor: Option<JoinHandle<u64>>,
}

impl StationPipeline {
    /// Start reading `station`'s boards. `sources` holds one packet source per
    /// board; if it's empty, the sources in the configuration are opened.
    /// Without a `delay_model`, the station's fixed delays are used.
    ///
    /// # Errors
    ///
    /// The configuration is checked before anything starts; any problem with
    /// it, or with opening the sources, is returned.
    pub fn start(
        config: Arc<RunConfig>,
        station: usize,
        sources: Vec<Box<dyn PacketSource>>,
        delay_model: Option<Box<dyn DelayModel>>,
        outbox: Outbox,
    ) -> Result<StationPipeline, PipelineError> {
        check_config(&config)?;
        let station_config = config
            .stations
            .get(station)
            .ok_or(PipelineError::StationOutOfRange {
                station,
                num_stations: config.num_stations(),
            })?;

        let sources = if sources.is_empty() {
            station_config
                .sources
                .iter()
                .map(|s| open_source(s))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            sources
        };
        if sources.len() != station_config.num_boards {
            return Err(PipelineError::SourceCount {
                station,
                num_boards: station_config.num_boards,
                num_sources: sources.len(),
            });
        }

        let stats = Arc::new(AssemblerStats::default());
        let stop = Arc::new(AtomicCell::new(false));
        let readers = sources
            .into_iter()
            .enumerate()
            .map(|(board, source)| {
                PacketReader::new(
                    board,
                    config.sample_bits,
                    config.num_slots_per_board,
                    source,
                    stats.clone(),
                )
            })
            .collect::<Vec<_>>();

        let blocks = block_pool(&config, station);
        let delay_model =
            delay_model.unwrap_or_else(|| Box::new(FixedDelays::from_config(&config)));
        let assembler = BlockAssembler::new(
            config.clone(),
            station,
            blocks.clone(),
            stats.clone(),
            stop.clone(),
        )?
        .with_delays(DelayTimeline::start(config.clone(), station, delay_model));
        let distributor = Distributor::new(config.clone(), station, blocks.clone(), outbox);

        info!(
            "Starting station {station} ('{}') with {} boards",
            station_config.name,
            readers.len()
        );
        let assembler_handle = {
            let (stop, blocks) = (stop.clone(), blocks.clone());
            thread::Builder::new()
                .name(format!("assemble-{station}"))
                .spawn(move || {
                    defer_on_unwind! { stop.store(true); blocks.shutdown(); }
                    raise_thread_priority();
                    assembler.run(readers)
                })
                .expect("OS can create threads")
        };
        let distributor_handle = {
            let (stop, blocks) = (stop.clone(), blocks.clone());
            thread::Builder::new()
                .name(format!("distribute-{station}"))
                .spawn(move || {
                    defer_on_unwind! { stop.store(true); blocks.shutdown(); }
                    distributor.run()
                })
                .expect("OS can create threads")
        };

        Ok(StationPipeline {
            station,
            stats,
            stop,
            blocks,
            assembler: Some(assembler_handle),
            distributor: Some(distributor_handle),
        })
    }

    /// Live counters of the assembler.
    pub fn stats(&self) -> Arc<AssemblerStats> {
        self.stats.clone()
    }

    /// Ask the pipeline to stop. What has been assembled is still sent.
    pub fn stop(&self) {
        debug!("Station {}: stop requested", self.station);
        self.stop.store(true);
    }

    /// Wait for the pipeline to end.
    pub fn join(mut self) -> StationReport {
        let counts = join_thread(self.assembler.take(), "assembler");
        let blocks_sent = join_thread(self.distributor.take(), "distributor");
        StationReport {
            counts,
            blocks_sent,
        }
    }
}

impl Drop for StationPipeline {
    fn drop(&mut self) {
        if self.assembler.is_some() || self.distributor.is_some() {
            // Dropped without joining; nothing will wait for the threads.
            self.stop.store(true);
            self.blocks.shutdown();
        }
    }
}
