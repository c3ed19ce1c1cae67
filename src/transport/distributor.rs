// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use itertools::Itertools;
use log::{debug, info, warn};

use super::{
    wire::{encode_payload, BlockMetadata},
    MessageKind, Outbox, SendRequest,
};
use crate::{block::SampleBlock, config::RunConfig, pool::BufferPool};

/// Sends a station's completed blocks to the nodes.
pub struct Distributor {
    config: Arc<RunConfig>,
    station: usize,
    input: BufferPool<SampleBlock>,
    outbox: Outbox,

    /// Every node with work to do, and its subbands.
    destinations: Vec<(usize, Vec<usize>)>,
}

impl Distributor {
    pub fn new(
        config: Arc<RunConfig>,
        station: usize,
        input: BufferPool<SampleBlock>,
        outbox: Outbox,
    ) -> Distributor {
        let destinations = (0..config.nodes.len())
            .map(|node| (node, config.node_subbands(node)))
            .filter(|(_, subbands)| !subbands.is_empty())
            .collect();
        Distributor {
            config,
            station,
            input,
            outbox,
            destinations,
        }
    }

    /// Send blocks until the end sentinel, then tell every node that this
    /// station has finished. Returns the number of blocks sent.
    pub fn run(self) -> u64 {
        debug!(
            "Station {}: distributing to nodes {}",
            self.station,
            self.destinations.iter().map(|(node, _)| node).join(", ")
        );
        // Sends are only waited on for as long as a node waits for them.
        let timeout = self.config.receive_timeout();

        let mut num_blocks = 0;
        while let Some(block) = self.input.consume() {
            self.send_block(&block, timeout);
            // Only now that every send has completed can the block be reused.
            self.input.release(block);
            num_blocks += 1;
        }

        let end = BlockMetadata::end_of_stream(self.station).encode();
        let requests = self
            .destinations
            .iter()
            .filter_map(|&(node, _)| {
                self.issue(node, MessageKind::Metadata, end.clone())
                    .map(|r| (node, r))
            })
            .collect();
        self.wait_all(requests, "end of stream", timeout);

        info!("Station {}: distributed {num_blocks} blocks", self.station);
        num_blocks
    }

    fn send_block(&self, block: &SampleBlock, timeout: Duration) {
        let mut requests = Vec::with_capacity(2 * self.destinations.len());
        for (node, subbands) in &self.destinations {
            let metadata = BlockMetadata::for_block(block, subbands).encode();
            let payload = encode_payload(block, subbands);
            for (kind, bytes) in [
                (MessageKind::Metadata, metadata),
                (MessageKind::Payload, payload),
            ] {
                if let Some(r) = self.issue(*node, kind, bytes) {
                    requests.push((*node, r));
                }
            }
        }
        self.wait_all(requests, &format!("block {}", block.id.seq), timeout);
    }

    fn issue(&self, node: usize, kind: MessageKind, bytes: Vec<u8>) -> Option<SendRequest> {
        match self.outbox.send(node, self.station, kind, bytes) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(
                    "Station {}: couldn't send {kind} to node {node}: {e}",
                    self.station
                );
                None
            }
        }
    }

    fn wait_all(&self, requests: Vec<(usize, SendRequest)>, what: &str, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        for (node, request) in requests {
            if let Err(e) = request.wait(deadline.saturating_duration_since(Instant::now())) {
                warn!(
                    "Station {}: sending {what} to node {node}: {e}",
                    self.station
                );
            }
        }
    }
}
