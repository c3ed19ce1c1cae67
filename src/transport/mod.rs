// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Moving blocks from stations to the compute nodes that own their subbands.

Every station has a [`Distributor`] that sends, for every block and every
node, a metadata message (which samples are missing, delays) followed by a
payload message (the samples of the node's subbands). Every node has a
[`Receiver`] that collects one contribution from every station for each
block, in sequence order.

The link itself is a [`Transport`]; [`LocalTransport`] connects stations and
nodes living in the same process.
 */

mod distributor;
mod error;
mod receiver;
mod wire;

pub use distributor::Distributor;
pub use error::TransportError;
pub use receiver::{received_block_pool, ReceivedBlock, Receiver};
pub use wire::{decode_payload, encode_payload, BlockMetadata, MetadataKind};

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crossbeam_channel::{bounded, unbounded, Receiver as ChannelReceiver, RecvTimeoutError, Sender};
use strum_macros::Display;

use crate::config::RunConfig;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    #[strum(serialize = "metadata")]
    Metadata,
    #[strum(serialize = "payload")]
    Payload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub bytes: Vec<u8>,
}

/// An issued send. Sends complete once the receiving side has taken the
/// message.
#[derive(Debug)]
pub struct SendRequest {
    /// Disconnects once the message has been taken. `None` for sends that
    /// were complete when issued.
    done: Option<ChannelReceiver<()>>,
}

impl SendRequest {
    pub fn completed() -> SendRequest {
        SendRequest { done: None }
    }

    pub fn pending(done: ChannelReceiver<()>) -> SendRequest {
        SendRequest { done: Some(done) }
    }

    /// Wait for the send to complete.
    pub fn wait(self, timeout: Duration) -> Result<(), TransportError> {
        match self.done {
            None => Ok(()),
            Some(done) => match done.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => Err(TransportError::TimedOut),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => Ok(()),
            },
        }
    }
}

/// A message link from every station to every node. Messages from one
/// station to one node arrive in the order they were sent.
pub trait Transport: Send + Sync {
    /// Start sending `bytes` from `station` to `node`. This doesn't block.
    fn send(
        &self,
        node: usize,
        station: usize,
        kind: MessageKind,
        bytes: Vec<u8>,
    ) -> Result<SendRequest, TransportError>;

    /// Receive the next message from `station` at `node`, waiting at most
    /// `timeout`.
    fn recv(&self, node: usize, station: usize, timeout: Duration)
        -> Result<Message, TransportError>;
}

/// The sending side of a transport, shared by every station of a process.
/// Requests are issued one at a time.
#[derive(Clone)]
pub struct Outbox {
    transport: Arc<dyn Transport>,
    issue_lock: Arc<Mutex<()>>,
}

impl Outbox {
    pub fn new(transport: Arc<dyn Transport>) -> Outbox {
        Outbox {
            transport,
            issue_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn send(
        &self,
        node: usize,
        station: usize,
        kind: MessageKind,
        bytes: Vec<u8>,
    ) -> Result<SendRequest, TransportError> {
        let _guard = self
            .issue_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.transport.send(node, station, kind, bytes)
    }
}

struct Envelope {
    message: Message,

    /// Dropped when the message is taken.
    _delivered: Sender<()>,
}

struct Link {
    tx: Sender<Envelope>,
    rx: ChannelReceiver<Envelope>,
}

/// Links between stations and nodes in the same process, one channel per
/// (node, station) pair.
pub struct LocalTransport {
    /// [node][station]
    links: Vec<Vec<Link>>,
}

impl LocalTransport {
    pub fn new(num_nodes: usize, num_stations: usize) -> LocalTransport {
        LocalTransport {
            links: (0..num_nodes)
                .map(|_| {
                    (0..num_stations)
                        .map(|_| {
                            let (tx, rx) = unbounded();
                            Link { tx, rx }
                        })
                        .collect()
                })
                .collect(),
        }
    }

    /// Links for every station and node of `config`.
    pub fn for_config(config: &RunConfig) -> LocalTransport {
        LocalTransport::new(config.nodes.len(), config.num_stations())
    }

    fn link(&self, node: usize, station: usize) -> Result<&Link, TransportError> {
        self.links
            .get(node)
            .and_then(|l| l.get(station))
            .ok_or(TransportError::NoSuchLink { node, station })
    }
}

impl Transport for LocalTransport {
    fn send(
        &self,
        node: usize,
        station: usize,
        kind: MessageKind,
        bytes: Vec<u8>,
    ) -> Result<SendRequest, TransportError> {
        let link = self.link(node, station)?;
        let (delivered_tx, delivered_rx) = bounded(0);
        link.tx
            .send(Envelope {
                message: Message { kind, bytes },
                _delivered: delivered_tx,
            })
            .map_err(|_| TransportError::Disconnected { node, station })?;
        Ok(SendRequest::pending(delivered_rx))
    }

    fn recv(
        &self,
        node: usize,
        station: usize,
        timeout: Duration,
    ) -> Result<Message, TransportError> {
        let link = self.link(node, station)?;
        match link.rx.recv_timeout(timeout) {
            // Dropping the rest of the envelope completes the send.
            Ok(envelope) => Ok(envelope.message),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TransportError::Disconnected { node, station })
            }
        }
    }
}
