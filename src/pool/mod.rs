// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bounded pools of reusable objects, used for every hand-off between
//! pipeline stages.
//!
//! A pool holds a fixed number of items. A producer [`BufferPool::acquire`]s a
//! free item, fills it and [`BufferPool::publish`]es it; a consumer
//! [`BufferPool::consume`]s it and eventually [`BufferPool::release`]s it back
//! to the free list. Because the number of items never changes, a fast
//! producer stalls once the consumer falls behind. `None` is the end-of-data
//! sentinel: the producer sends it with [`BufferPool::finish`], and it is also
//! returned by every blocking call once the pool has been shut down.


use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use log::trace;

/// A bounded pool of `T`. Cloning the pool gives another handle to the same
/// items, so a producer and a consumer each keep their own handle.
pub struct BufferPool<T> {
    name: Arc<str>,
    capacity: usize,

    free_tx: Sender<T>,
    free_rx: Receiver<T>,

    /// Completed items. `None` is the end-of-data sentinel.
    filled_tx: Sender<Option<T>>,
    filled_rx: Receiver<Option<T>>,

    /// Dropping the sender disconnects `shutdown_rx`, which wakes every
    /// blocked call.
    shutdown_tx: Arc<Mutex<Option<Sender<()>>>>,
    shutdown_rx: Receiver<()>,
}

// Derived `Clone` would require `T: Clone`.
impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            capacity: self.capacity,
            free_tx: self.free_tx.clone(),
            free_rx: self.free_rx.clone(),
            filled_tx: self.filled_tx.clone(),
            filled_rx: self.filled_rx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
        }
    }
}

impl<T> BufferPool<T> {
    /// Create a pool and fill its free list with `capacity` items made by
    /// `make`.
    pub fn new<F>(name: &str, capacity: usize, mut make: F) -> BufferPool<T>
    where
        F: FnMut() -> T,
    {
        let pool = BufferPool::empty(name, capacity);
        for _ in 0..capacity {
            pool.release(make());
        }
        pool
    }

    /// Create a pool that can hold `capacity` items, but don't populate it.
    /// Items are added with [`BufferPool::release`].
    pub fn empty(name: &str, capacity: usize) -> BufferPool<T> {
        let (free_tx, free_rx) = bounded(capacity);
        // One extra slot so that the sentinel never blocks a producer that
        // has published every item.
        let (filled_tx, filled_rx) = bounded(capacity + 1);
        let (shutdown_tx, shutdown_rx) = bounded(0);
        BufferPool {
            name: name.into(),
            capacity,
            free_tx,
            free_rx,
            filled_tx,
            filled_rx,
            shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
            shutdown_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get a free item, blocking until one is available. `None` is returned
    /// once the pool is shut down.
    pub fn acquire(&self) -> Option<T> {
        if self.is_shut_down() {
            return None;
        }
        select! {
            recv(self.free_rx) -> item => item.ok(),
            recv(self.shutdown_rx) -> _ => None,
        }
    }

    /// Put an item back on the free list.
    pub fn release(&self, item: T) {
        // This can only fail if every receiver is gone, in which case nobody
        // is interested in the item any more.
        if self.free_tx.try_send(item).is_err() {
            trace!("{}: dropping released item; free list is full or closed", self.name);
        }
    }

    /// Hand a completed item to the consumer.
    pub fn publish(&self, item: T) {
        self.send_filled(Some(item));
    }

    /// Tell the consumer that no more items will be published.
    pub fn finish(&self) {
        self.send_filled(None);
    }

    fn send_filled(&self, item: Option<T>) {
        select! {
            send(self.filled_tx, item) -> _ => (),
            recv(self.shutdown_rx) -> _ => (),
        }
    }

    /// Get the next completed item, blocking until one is available. `None`
    /// is the end-of-data sentinel (or the pool was shut down).
    pub fn consume(&self) -> Option<T> {
        if self.is_shut_down() {
            return None;
        }
        select! {
            recv(self.filled_rx) -> item => item.ok().flatten(),
            recv(self.shutdown_rx) -> _ => None,
        }
    }

    /// Like [`BufferPool::consume`], but give up after `timeout`. The outer
    /// `Err` means that nothing was available in time.
    pub fn consume_timeout(&self, timeout: Duration) -> Result<Option<T>, RecvTimeoutError> {
        if self.is_shut_down() {
            return Ok(None);
        }
        select! {
            recv(self.filled_rx) -> item => Ok(item.ok().flatten()),
            recv(self.shutdown_rx) -> _ => Ok(None),
            default(timeout) => Err(RecvTimeoutError::Timeout),
        }
    }

    /// Wake every blocked call on every handle of this pool; they all return
    /// the sentinel from now on.
    pub fn shutdown(&self) {
        let sender = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if sender.is_some() {
            trace!("{}: shutting down", self.name);
        }
        drop(sender);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_tx
            .lock()
            .map(|s| s.is_none())
            .unwrap_or(true)
    }

    /// The channel completed items arrive on, for waiting on several pools at
    /// once with [`crossbeam_channel::Select`].
    pub(crate) fn filled_receiver(&self) -> &Receiver<Option<T>> {
        &self.filled_rx
    }

    /// The number of items currently on the free list.
    pub fn num_free(&self) -> usize {
        self.free_rx.len()
    }

    /// The number of completed items waiting for the consumer.
    pub fn num_filled(&self) -> usize {
        self.filled_rx.len()
    }
}
