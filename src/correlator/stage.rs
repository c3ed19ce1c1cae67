// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{sync::Arc, thread, time::Instant};

use log::{debug, error, info, trace};
use ndarray::{prelude::*, Zip};
use scopeguard::defer_on_unwind;

use super::{flagging, ComputeError, ComputeUnit, CorrelatedBlock, Stage, StageTimers};
use crate::{
    block::BlockId,
    c32,
    config::RunConfig,
    constants::NUM_POLARISATIONS,
    delays::DelaySet,
    flags::FlagSet,
    pool::BufferPool,
    transport::ReceivedBlock,
};

/// Make the pool a node's correlator fills.
pub fn correlated_block_pool(config: &RunConfig, node: usize) -> BufferPool<CorrelatedBlock> {
    let subbands = config.node_subbands(node);
    BufferPool::new(&format!("correlated-{node}"), 3, || {
        CorrelatedBlock::new(&subbands, config.num_baselines(), config.num_channels)
    })
}

/// A received block converted for the compute unit.
struct PreparedBlock {
    id: BlockId,
    substituted: Vec<usize>,

    /// Flagged samples are zero. [subband][station][sample][pol]
    samples: Array4<c32>,

    /// [subband][station]
    channel_flags: Array2<FlagSet>,

    delays: DelaySet,
}

impl PreparedBlock {
    fn new(num_subbands: usize, num_stations: usize, block_size: usize) -> PreparedBlock {
        PreparedBlock {
            id: BlockId { seq: 0, begin: 0 },
            substituted: vec![],
            samples: Array4::zeros((num_subbands, num_stations, block_size, NUM_POLARISATIONS)),
            channel_flags: Array2::from_elem((num_subbands, num_stations), FlagSet::new()),
            delays: DelaySet::zeros(num_stations),
        }
    }

    fn prepare(&mut self, received: &ReceivedBlock, config: &RunConfig) {
        self.id = received.id;
        self.substituted.clone_from(&received.substituted);
        self.delays.clone_from(&received.delays);
        Zip::from(&mut self.samples)
            .and(&received.samples)
            .for_each(|dst, src| *dst = c32::new(f32::from(src.re), f32::from(src.im)));

        for ((subband, station), missing) in received.missing.indexed_iter() {
            for range in missing.ranges() {
                self.samples
                    .slice_mut(s![subband, station, range.clone(), ..])
                    .fill(c32::default());
            }
            self.channel_flags[(subband, station)] = flagging::channel_flags(
                missing,
                config.num_channels,
                config.num_taps,
                config.samples_per_channel(),
            );
        }
    }
}

/// Correlates a node's received blocks. A transfer thread prepares the next
/// block while the previous one is being computed.
pub struct CorrelatorStage {
    config: Arc<RunConfig>,
    node: usize,
    compute: Box<dyn ComputeUnit>,
    input: BufferPool<ReceivedBlock>,
    output: BufferPool<CorrelatedBlock>,
    timers: Arc<StageTimers>,

    /// [subband][channel]
    channel_frequencies: Vec<Vec<f64>>,
}

impl CorrelatorStage {
    pub fn new(
        config: Arc<RunConfig>,
        node: usize,
        compute: Box<dyn ComputeUnit>,
        input: BufferPool<ReceivedBlock>,
        output: BufferPool<CorrelatedBlock>,
    ) -> CorrelatorStage {
        let num_channels = config.num_channels;
        let channel_width = config.sample_rate_hz / num_channels as f64;
        let channel_frequencies = config
            .node_subbands(node)
            .into_iter()
            .map(|sb| {
                let centre = config.subband_frequencies_hz[sb];
                (0..num_channels)
                    .map(|ch| centre + (ch as f64 - (num_channels / 2) as f64) * channel_width)
                    .collect()
            })
            .collect();
        CorrelatorStage {
            config,
            node,
            compute,
            input,
            output,
            timers: Arc::new(StageTimers::default()),
            channel_frequencies,
        }
    }

    pub fn timers(&self) -> Arc<StageTimers> {
        self.timers.clone()
    }

    /// Correlate blocks until the input's end sentinel. Returns the number of
    /// blocks published, failed ones included.
    pub fn run(mut self) -> u64 {
        info!(
            "Node {}: correlating with the {} compute unit",
            self.node,
            self.compute.name()
        );
        let num_stations = self.config.num_stations();
        let num_subbands = self.channel_frequencies.len();
        let work = BufferPool::new(&format!("work-{}", self.node), 2, || {
            PreparedBlock::new(num_subbands, num_stations, self.config.block_size)
        });

        let work = &work;
        let num_blocks = thread::scope(|scope| {
            let (config, input, timers) =
                (self.config.clone(), self.input.clone(), self.timers.clone());
            let node = self.node;
            let transfer_handle = thread::Builder::new()
                .name(format!("transfer-{node}"))
                .spawn_scoped(scope, move || {
                    defer_on_unwind! { work.shutdown(); }
                    transfer(&config, node, &input, work, &timers);
                })
                .expect("OS can create threads");

            let num_blocks = {
                defer_on_unwind! { work.shutdown(); }
                self.compute_blocks(work)
            };
            if transfer_handle.join().is_err() {
                error!("Node {node}: the transfer thread panicked");
            }
            num_blocks
        });

        self.output.finish();
        info!("Node {}: correlated {num_blocks} blocks; {}", self.node, self.timers);
        num_blocks
    }

    fn compute_blocks(&mut self, work: &BufferPool<PreparedBlock>) -> u64 {
        let (num_stations, num_channels) = (self.config.num_stations(), self.config.num_channels);
        let mut channelized = Array4::zeros((
            num_stations,
            num_channels,
            self.config.samples_per_channel(),
            NUM_POLARISATIONS,
        ));

        let mut num_blocks = 0;
        while let Some(prepared) = work.consume() {
            let Some(mut out) = self.output.acquire() else {
                work.release(prepared);
                // Nobody wants any more output.
                work.shutdown();
                break;
            };
            out.id = prepared.id;
            out.substituted.clone_from(&prepared.substituted);
            out.failed = false;
            if let Err(e) = self.correlate_block(&prepared, &mut out, &mut channelized) {
                error!(
                    "Node {}: correlation of block {} failed; its visibilities are zeroed: {e}",
                    self.node, prepared.id.seq
                );
                out.invalidate();
                self.timers.add_failure();
            }
            work.release(prepared);
            self.output.publish(out);
            num_blocks += 1;
        }
        num_blocks
    }

    fn correlate_block(
        &mut self,
        prepared: &PreparedBlock,
        out: &mut CorrelatedBlock,
        channelized: &mut Array4<c32>,
    ) -> Result<(), ComputeError> {
        for (i, vis) in out.subbands.iter_mut().enumerate() {
            let samples = prepared.samples.index_axis(Axis(0), i);

            let start = Instant::now();
            if self.config.num_channels == 1 {
                channelized.index_axis_mut(Axis(1), 0).assign(&samples);
            } else {
                self.compute
                    .channelize(vis.subband, samples, channelized.view_mut())?;
            }
            self.timers.add(Stage::Channelize, start.elapsed());

            let start = Instant::now();
            self.compute.correct_phases(
                &self.channel_frequencies[i],
                &prepared.delays,
                channelized.view_mut(),
            )?;
            self.timers.add(Stage::PhaseCorrection, start.elapsed());

            let start = Instant::now();
            self.compute
                .correlate(channelized.view(), vis.visibilities.view_mut())?;
            self.timers.add(Stage::Correlate, start.elapsed());

            self.timers.time(Stage::Weighting, || {
                flagging::valid_samples(
                    prepared.channel_flags.row(i),
                    self.config.samples_per_channel(),
                    vis.valid_samples.view_mut(),
                );
                flagging::apply_weights(
                    vis.visibilities.view_mut(),
                    vis.valid_samples.view(),
                    vis.weights.view_mut(),
                );
            });
        }
        Ok(())
    }
}

/// Prepare received blocks for the compute unit until the input's end
/// sentinel.
fn transfer(
    config: &RunConfig,
    node: usize,
    input: &BufferPool<ReceivedBlock>,
    work: &BufferPool<PreparedBlock>,
    timers: &StageTimers,
) {
    while let Some(received) = input.consume() {
        let Some(mut prepared) = work.acquire() else {
            input.release(received);
            break;
        };
        timers.time(Stage::Transfer, || prepared.prepare(&received, config));
        input.release(received);
        trace!("Node {node}: block {} prepared", prepared.id.seq);
        work.publish(prepared);
    }
    debug!("Node {node}: transfer finished");
    work.finish();
}
