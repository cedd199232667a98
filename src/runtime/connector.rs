// src/runtime/connector.rs

//! Producer → consumer streaming channels.
//!
//! A [`Channel`] is created by [`connect`] between a source runtime and a sink
//! runtime. Every block the source emits is handed to each callback the sink
//! registered, in registration order, and blocks arrive in emission order.
//!
//! With the default [`ChannelPolicy::DropWhenUnsubscribed`], a block emitted
//! while the sink has no callback is dropped and counted. That is a normal
//! outcome, not an error: it shows up in [`ChannelStats::dropped`] and in the
//! logs. [`ChannelPolicy::Buffer`] keeps a bounded backlog instead and replays
//! it to the first subscriber.
//!
//! Callbacks run on the emitting task while the channel's delivery lock is
//! held, so a callback must not emit on the channel that invoked it.
//!
//! A consumer that processes blocks slower than they arrive bounds its
//! channels with a [`Backlog`]; producers then wait in
//! [`TaskRuntime::ready`] before emitting.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::model::DataBlock;
use crate::runtime::task_runtime::TaskRuntime;

/// Subscriber callback registered through [`TaskRuntime::receive`].
pub type BlockCallback = Arc<dyn Fn(DataBlock) + Send + Sync>;

/// What a channel does with blocks emitted before anyone subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelPolicy {
    /// Drop the block and count it.
    #[default]
    DropWhenUnsubscribed,
    /// Queue up to `capacity` blocks for the first subscriber; drop the rest.
    Buffer { capacity: usize },
}

impl ChannelPolicy {
    /// `0` means drop, anything else buffers that many blocks.
    pub fn from_buffer_len(capacity: usize) -> Self {
        if capacity == 0 {
            ChannelPolicy::DropWhenUnsubscribed
        } else {
            ChannelPolicy::Buffer { capacity }
        }
    }
}

/// Counters for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStats {
    /// Blocks handed to at least one subscriber.
    pub delivered: u64,
    /// Blocks that reached no subscriber.
    pub dropped: u64,
    /// Blocks currently waiting for a first subscriber.
    pub buffered: u64,
}

/// Consumer-side limit on blocks received but not yet settled.
///
/// The consumer calls [`admit`](Self::admit) for each block it takes off a
/// channel and [`settle`](Self::settle) once that block is processed.
/// Producers wait in [`wait_for_room`](Self::wait_for_room) while the limit
/// is reached. Closing the backlog releases every waiter for good.
#[derive(Debug)]
pub struct Backlog {
    limit: usize,
    pending: AtomicUsize,
    closed: AtomicBool,
    settled: Notify,
}

impl Backlog {
    /// A limit of `0` is treated as `1`.
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.max(1),
            pending: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            settled: Notify::new(),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn has_room(&self) -> bool {
        self.is_closed() || self.pending() < self.limit
    }

    pub fn admit(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn settle(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.settled.notify_waiters();
    }

    /// Stop limiting; called when the consumer goes away.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.settled.notify_waiters();
    }

    /// Resolves once fewer than `limit` blocks are pending or the backlog is
    /// closed.
    pub async fn wait_for_room(&self) {
        loop {
            // Registered before the check so a settle in between is not missed.
            let settled = self.settled.notified();
            if self.has_room() {
                return;
            }
            settled.await;
        }
    }
}

#[derive(Default)]
struct ChannelInner {
    subscribers: Vec<BlockCallback>,
    backlog: VecDeque<DataBlock>,
    limits: Vec<Arc<Backlog>>,
    closed: bool,
}

/// One-directional, in-order, fan-out channel between two runtimes.
pub struct Channel {
    label: String,
    policy: ChannelPolicy,
    /// Serialises whole deliveries so FIFO holds even with concurrent emitters.
    delivery: Mutex<()>,
    inner: Mutex<ChannelInner>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("label", &self.label)
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Channel {
    pub fn new(label: impl Into<String>, policy: ChannelPolicy) -> Self {
        Self {
            label: label.into(),
            policy,
            delivery: Mutex::new(()),
            inner: Mutex::new(ChannelInner::default()),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn policy(&self) -> ChannelPolicy {
        self.policy
    }

    pub fn is_closed(&self) -> bool {
        self.inner().closed
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            buffered: self.inner().backlog.len() as u64,
        }
    }

    /// Deliver `block` to every current subscriber, in registration order.
    pub fn send(&self, block: DataBlock) {
        let _delivery = lock(&self.delivery);

        let subscribers = {
            let mut inner = self.inner();
            if inner.closed {
                drop(inner);
                self.record_drop(&block, "channel closed");
                return;
            }
            if inner.subscribers.is_empty() {
                match self.policy {
                    ChannelPolicy::Buffer { capacity } if inner.backlog.len() < capacity => {
                        inner.backlog.push_back(block);
                        trace!(channel = %self.label, backlog = inner.backlog.len(), "block buffered");
                        return;
                    }
                    _ => {
                        drop(inner);
                        self.record_drop(&block, "no receiver registered");
                        return;
                    }
                }
            }
            inner.subscribers.clone()
        };

        for callback in &subscribers {
            callback(block.clone());
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        trace!(
            channel = %self.label,
            rows = block.len(),
            subscribers = subscribers.len(),
            "block delivered"
        );
    }

    /// Register a callback. Any buffered backlog is replayed to it first.
    ///
    /// On a closed channel the backlog is still replayed, but the callback is
    /// released right away instead of being kept.
    pub fn subscribe(&self, callback: BlockCallback) {
        let _delivery = lock(&self.delivery);

        let backlog: Vec<DataBlock> = {
            let mut inner = self.inner();
            if !inner.closed {
                inner.subscribers.push(Arc::clone(&callback));
            }
            inner.backlog.drain(..).collect()
        };

        if !backlog.is_empty() {
            debug!(channel = %self.label, blocks = backlog.len(), "replaying buffered blocks");
        }
        for block in backlog {
            callback(block);
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Make producers on this channel wait for room in `limit`.
    pub fn limit_with(&self, limit: Arc<Backlog>) {
        let mut inner = self.inner();
        if !inner.closed {
            inner.limits.push(limit);
        }
    }

    /// Resolves once every consumer limiting this channel has room.
    pub async fn ready(&self) {
        let limits = self.inner().limits.clone();
        for limit in limits {
            limit.wait_for_room().await;
        }
    }

    /// Mark end-of-stream and release all subscriber callbacks.
    pub fn close(&self) {
        let released = {
            let mut inner = self.inner();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.limits.clear();
            std::mem::take(&mut inner.subscribers)
        };
        debug!(
            channel = %self.label,
            subscribers = released.len(),
            stats = ?self.stats(),
            "channel closed"
        );
        drop(released);
    }

    fn record_drop(&self, block: &DataBlock, reason: &str) {
        let previous = self.dropped.fetch_add(1, Ordering::Relaxed);
        if previous == 0 {
            warn!(channel = %self.label, rows = block.len(), reason, "dropped emission");
        } else {
            debug!(
                channel = %self.label,
                rows = block.len(),
                reason,
                dropped = previous + 1,
                "dropped emission"
            );
        }
    }

    fn inner(&self) -> MutexGuard<'_, ChannelInner> {
        lock(&self.inner)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wire `source`'s emission to `sink`'s subscription with the default policy.
pub fn connect(source: &TaskRuntime, sink: &TaskRuntime) -> Arc<Channel> {
    connect_with(source, sink, ChannelPolicy::default())
}

/// Wire `source`'s emission to `sink`'s subscription.
pub fn connect_with(source: &TaskRuntime, sink: &TaskRuntime, policy: ChannelPolicy) -> Arc<Channel> {
    let label = format!("{}->{}", source.name(), sink.name());
    let channel = Arc::new(Channel::new(label, policy));
    source.attach_output(Arc::clone(&channel));
    sink.attach_input(Arc::clone(&channel));
    debug!(channel = %channel.label(), ?policy, "runtimes connected");
    channel
}
