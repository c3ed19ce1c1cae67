// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_utils::atomic::AtomicCell;
use log::{debug, info, trace, warn};
use ndarray::prelude::*;
use num_complex::Complex;

use super::{
    wire::{decode_payload, BlockMetadata, MetadataKind},
    Message, MessageKind, Transport, TransportError,
};
use crate::{
    block::BlockId, config::RunConfig, constants::*, delays::DelaySet, flags::FlagSet,
    misc::RateLimited, pool::BufferPool,
};

/// Every station's samples of one block, for the subbands of one node.
#[derive(Debug, Clone)]
pub struct ReceivedBlock {
    pub id: BlockId,

    /// The node's subbands, in ascending order.
    pub subbands: Vec<usize>,

    /// [subband][station][sample][pol]
    pub samples: Array4<Complex<i16>>,

    /// The samples that are missing, [subband][station].
    pub missing: Array2<FlagSet>,

    /// Every station's delays, [station][pol].
    pub delays: DelaySet,

    /// Stations that didn't deliver this block; they are fully flagged.
    pub substituted: Vec<usize>,
}

impl ReceivedBlock {
    pub fn new(subbands: Vec<usize>, num_stations: usize, block_size: usize) -> ReceivedBlock {
        let num_subbands = subbands.len();
        ReceivedBlock {
            id: BlockId { seq: 0, begin: 0 },
            subbands,
            samples: Array4::zeros((num_subbands, num_stations, block_size, NUM_POLARISATIONS)),
            missing: Array2::from_elem((num_subbands, num_stations), FlagSet::new()),
            delays: DelaySet::zeros(num_stations),
            substituted: vec![],
        }
    }

    pub fn num_stations(&self) -> usize {
        self.samples.len_of(Axis(1))
    }

    pub fn block_size(&self) -> usize {
        self.samples.len_of(Axis(2))
    }

    fn reset(&mut self, id: BlockId) {
        self.id = id;
        self.substituted.clear();
    }

    /// Copy a station's contribution in.
    fn fill(
        &mut self,
        station: usize,
        metadata: &BlockMetadata,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if metadata.station != station {
            return Err(TransportError::WrongStation {
                expected: station,
                got: metadata.station,
            });
        }
        if metadata.begin != self.id.begin {
            return Err(TransportError::WrongBegin {
                seq: self.id.seq,
                expected: self.id.begin,
                got: metadata.begin,
            });
        }
        if metadata.subbands != self.subbands {
            return Err(TransportError::UnexpectedSubbands {
                expected: self.subbands.clone(),
                got: metadata.subbands.clone(),
            });
        }
        decode_payload(payload, self.samples.slice_mut(s![.., station, .., ..]))?;
        for (i, missing) in metadata.missing.iter().enumerate() {
            self.missing[(i, station)].clone_from(missing);
        }
        for pol in 0..NUM_POLARISATIONS {
            self.delays.begin[(station, pol)] = metadata.delays_begin[pol];
            self.delays.after_end[(station, pol)] = metadata.delays_after_end[pol];
        }
        Ok(())
    }

    /// Stand in for a station that didn't deliver: no samples, no delays.
    fn substitute(&mut self, station: usize) {
        let block_size = self.block_size();
        self.samples
            .slice_mut(s![.., station, .., ..])
            .fill(Complex::new(0, 0));
        self.missing
            .column_mut(station)
            .iter_mut()
            .for_each(|m| *m = FlagSet::full(block_size));
        self.delays.begin.row_mut(station).fill(Default::default());
        self.delays.after_end.row_mut(station).fill(Default::default());
        self.substituted.push(station);
    }
}

/// Make the pool a node's receiver fills.
pub fn received_block_pool(config: &RunConfig, node: usize) -> BufferPool<ReceivedBlock> {
    let subbands = config.node_subbands(node);
    BufferPool::new(&format!("received-{node}"), 3, || {
        ReceivedBlock::new(subbands.clone(), config.num_stations(), config.block_size)
    })
}

struct Contribution {
    metadata: BlockMetadata,
    payload: Vec<u8>,
}

/// Collects every station's contribution to each block for one node.
pub struct Receiver {
    config: Arc<RunConfig>,
    node: usize,
    subbands: Vec<usize>,
    transport: Arc<dyn Transport>,
    output: BufferPool<ReceivedBlock>,
    stop: Arc<AtomicCell<bool>>,

    /// A contribution that arrived before its block, per station.
    pending: Vec<Option<Contribution>>,

    /// Stations that have sent their end of stream.
    ended: Vec<bool>,

    substitute_warning: RateLimited,
}

impl Receiver {
    pub fn new(
        config: Arc<RunConfig>,
        node: usize,
        transport: Arc<dyn Transport>,
        output: BufferPool<ReceivedBlock>,
        stop: Arc<AtomicCell<bool>>,
    ) -> Receiver {
        let num_stations = config.num_stations();
        Receiver {
            subbands: config.node_subbands(node),
            config,
            node,
            transport,
            output,
            stop,
            pending: (0..num_stations).map(|_| None).collect(),
            ended: vec![false; num_stations],
            substitute_warning: RateLimited::new(Duration::from_secs(10)),
        }
    }

    /// Publish blocks until every station has ended, the observation is over
    /// or a stop is requested. Returns the number of blocks published.
    pub fn run(mut self) -> u64 {
        let mut seq = 0;
        if self.subbands.is_empty() {
            info!("Node {}: no subbands to receive", self.node);
        } else {
            seq = self.receive_blocks();
            self.drain();
        }
        self.output.finish();
        info!("Node {}: received {seq} blocks", self.node);
        seq
    }

    fn receive_blocks(&mut self) -> u64 {
        let num_blocks = self.config.num_blocks();
        let timeout = self.config.receive_timeout();
        let mut seq = 0;
        loop {
            if self.stop.load() {
                debug!("Node {}: stop requested", self.node);
                break;
            }
            if num_blocks.map(|n| seq >= n).unwrap_or(false) {
                debug!("Node {}: observation over", self.node);
                break;
            }
            if self.ended.iter().all(|&e| e) && self.pending.iter().all(Option::is_none) {
                debug!("Node {}: every station has ended", self.node);
                break;
            }
            let Some(mut block) = self.output.acquire() else {
                break;
            };
            block.reset(BlockId {
                seq,
                begin: self.config.block_begin(seq),
            });

            let deadline = Instant::now() + timeout;
            let mut num_delivered = 0;
            for station in 0..self.config.num_stations() {
                let contribution = self.receive(station, seq, deadline);
                match contribution.map(|c| block.fill(station, &c.metadata, &c.payload)) {
                    Some(Ok(())) => num_delivered += 1,
                    Some(Err(e)) => {
                        warn!(
                            "Node {}: bad contribution from station {station} to block {seq}: {e}",
                            self.node
                        );
                        block.substitute(station);
                    }
                    None => block.substitute(station),
                }
            }

            // Nothing more is coming.
            if num_delivered == 0 && (self.stop.load() || self.ended.iter().all(|&e| e)) {
                self.output.release(block);
                break;
            }
            if !block.substituted.is_empty() {
                if let Some(suppressed) = self.substitute_warning.check() {
                    warn!(
                        "Node {}: block {seq}: no data from stations {:?}; they are flagged ({suppressed} similar messages suppressed)",
                        self.node, block.substituted
                    );
                }
            }
            trace!("Node {}: block {seq} received", self.node);
            self.output.publish(block);
            seq += 1;
        }
        seq
    }

    /// Get `station`'s contribution to block `seq`, waiting until `deadline`
    /// at the latest.
    fn receive(&mut self, station: usize, seq: u64, deadline: Instant) -> Option<Contribution> {
        if let Some(c) = self.pending[station].take() {
            if c.metadata.seq == seq {
                return Some(c);
            }
            if c.metadata.seq > seq {
                self.pending[station] = Some(c);
                return None;
            }
        }

        while !self.ended[station] && !self.stop.load() {
            let Some(message) = self.recv(station, deadline) else {
                return None;
            };
            if message.kind != MessageKind::Metadata {
                warn!(
                    "Node {}: dropping {} from station {station} without metadata",
                    self.node, message.kind
                );
                continue;
            }
            let metadata = match BlockMetadata::decode(&message.bytes, self.config.block_size) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Node {}: bad metadata from station {station}: {e}", self.node);
                    continue;
                }
            };
            if metadata.kind == MetadataKind::EndOfStream {
                debug!("Node {}: station {station} has ended", self.node);
                self.ended[station] = true;
                return None;
            }

            // The payload always follows its metadata.
            let Some(payload) = self.recv(station, deadline) else {
                return None;
            };
            if payload.kind != MessageKind::Payload {
                warn!(
                    "Node {}: station {station} sent {} where a payload was expected",
                    self.node, payload.kind
                );
                continue;
            }
            let c = Contribution {
                metadata,
                payload: payload.bytes,
            };
            match c.metadata.seq.cmp(&seq) {
                std::cmp::Ordering::Less => {
                    debug!(
                        "Node {}: dropping stale block {} from station {station}",
                        self.node, c.metadata.seq
                    );
                }
                std::cmp::Ordering::Equal => return Some(c),
                std::cmp::Ordering::Greater => {
                    self.pending[station] = Some(c);
                    return None;
                }
            }
        }
        None
    }

    /// The next message from `station`, unless `deadline` passes, the link
    /// fails or a stop is requested.
    fn recv(&mut self, station: usize, deadline: Instant) -> Option<Message> {
        loop {
            if self.stop.load() {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            match self
                .transport
                .recv(self.node, station, (deadline - now).min(POLL_INTERVAL))
            {
                Ok(message) => return Some(message),
                Err(TransportError::TimedOut) => (),
                Err(e) => {
                    warn!("Node {}: station {station}: {e}", self.node);
                    self.ended[station] = true;
                    return None;
                }
            }
        }
    }

    /// Take the end-of-stream messages of stations that are still sending, so
    /// that they don't wait on this node.
    fn drain(&mut self) {
        let deadline = Instant::now() + POLL_INTERVAL;
        for station in 0..self.config.num_stations() {
            while !self.ended[station] {
                let Some(message) = self.recv(station, deadline) else {
                    break;
                };
                if message.kind == MessageKind::Metadata
                    && BlockMetadata::decode(&message.bytes, self.config.block_size)
                        .map(|m| m.kind == MetadataKind::EndOfStream)
                        .unwrap_or(false)
                {
                    self.ended[station] = true;
                }
            }
        }
    }
}
