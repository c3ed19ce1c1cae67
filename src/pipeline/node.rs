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
    config::RunConfig,
    correlator::{
        correlated_block_pool, ComputeUnit, CorrelatedBlock, CorrelatorStage, CpuComputeUnit,
        StageTimers,
    },
    error::PipelineError,
    pool::BufferPool,
    transport::{received_block_pool, ReceivedBlock, Receiver, Transport},
};

/// What a node pipeline did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeReport {
    pub blocks_received: u64,
    pub blocks_correlated: u64,
}

/// One node's receiver and correlator.
pub struct NodePipeline {
    node: usize,
    stop: StopFlag,
    received: BufferPool<ReceivedBlock>,
    output: BufferPool<CorrelatedBlock>,
    timers: Arc<StageTimers>,
    receiver: Option<JoinHandle<u64>>,
    correlator: Option<JoinHandle<u64>>,
}

impl NodePipeline {
    /// Start receiving and correlating `node`'s subbands. Without a
    /// `compute` unit, a [`CpuComputeUnit`] is used.
    ///
    /// The correlated blocks must be taken from [`NodePipeline::output`]
    /// (and released back to it), otherwise the pipeline stalls.
    pub fn start(
        config: Arc<RunConfig>,
        node: usize,
        transport: Arc<dyn Transport>,
        compute: Option<Box<dyn ComputeUnit>>,
    ) -> Result<NodePipeline, PipelineError> {
        check_config(&config)?;
        let node_config = config.nodes.get(node).ok_or(PipelineError::NodeOutOfRange {
            node,
            num_nodes: config.nodes.len(),
        })?;
        info!(
            "Starting node {node} ('{}') for subbands {:?}",
            node_config.name,
            config.node_subbands(node)
        );

        let stop = Arc::new(AtomicCell::new(false));
        let received = received_block_pool(&config, node);
        let output = correlated_block_pool(&config, node);
        let compute = compute.unwrap_or_else(|| Box::new(CpuComputeUnit::new(&config)));

        let receiver = Receiver::new(
            config.clone(),
            node,
            transport,
            received.clone(),
            stop.clone(),
        );
        let correlator =
            CorrelatorStage::new(config.clone(), node, compute, received.clone(), output.clone());
        let timers = correlator.timers();

        let receiver_handle = {
            let (stop, received) = (stop.clone(), received.clone());
            thread::Builder::new()
                .name(format!("receive-{node}"))
                .spawn(move || {
                    defer_on_unwind! { stop.store(true); received.shutdown(); }
                    receiver.run()
                })
                .expect("OS can create threads")
        };
        let correlator_handle = {
            let (received, output) = (received.clone(), output.clone());
            thread::Builder::new()
                .name(format!("correlate-{node}"))
                .spawn(move || {
                    defer_on_unwind! { received.shutdown(); output.shutdown(); }
                    correlator.run()
                })
                .expect("OS can create threads")
        };

        Ok(NodePipeline {
            node,
            stop,
            received,
            output,
            timers,
            receiver: Some(receiver_handle),
            correlator: Some(correlator_handle),
        })
    }

    /// Correlated blocks come out of this pool, in block order, followed by
    /// the end sentinel.
    pub fn output(&self) -> BufferPool<CorrelatedBlock> {
        self.output.clone()
    }

    pub fn timers(&self) -> Arc<StageTimers> {
        self.timers.clone()
    }

    /// Ask the pipeline to stop. Blocks already received are still
    /// correlated.
    pub fn stop(&self) {
        debug!("Node {}: stop requested", self.node);
        self.stop.store(true);
    }

    /// Wait for the pipeline to end.
    pub fn join(mut self) -> NodeReport {
        let blocks_received = join_thread(self.receiver.take(), "receiver");
        let blocks_correlated = join_thread(self.correlator.take(), "correlator");
        NodeReport {
            blocks_received,
            blocks_correlated,
        }
    }
}

impl Drop for NodePipeline {
    fn drop(&mut self) {
        if self.receiver.is_some() || self.correlator.is_some() {
            self.stop.store(true);
            self.received.shutdown();
            self.output.shutdown();
        }
    }
}
