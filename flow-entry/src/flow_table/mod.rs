// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The flow affinity cache.
//!
//! Readers walk a bucket without taking any lock: each bucket is an [`ArcSwap`] of an immutable
//! chain, and writers (insert, flush, garbage collection) publish a modified copy while holding
//! the writer lock.  Entry fields are atomics, so a hit may be refreshed by any reader.

mod display;

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

use crate::clock::Clock;

/// Number of buckets (a power of two).
pub const FLOW_BUCKETS: usize = 1024;

/// Maximum number of entries held by a cache.
pub const MAX_FLOW_ENTRIES: usize = 4096;

/// Default time after which an idle entry is reclaimed.
pub const DEFAULT_AGEING: Duration = Duration::from_secs(3);

fn as_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// One remembered flow.
#[derive(Debug)]
pub struct FlowEntry {
    hash: u32,
    rps_rxhash: AtomicU32,
    queue_index: AtomicU16,
    updated: AtomicU64,
}

impl FlowEntry {
    fn new(hash: u32, queue_index: u16, now: Duration) -> Self {
        Self {
            hash,
            rps_rxhash: AtomicU32::new(0),
            queue_index: AtomicU16::new(queue_index),
            updated: AtomicU64::new(as_nanos(now)),
        }
    }

    /// The flow hash this entry is keyed by.
    #[must_use]
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// The queue which last submitted a packet of this flow.
    #[must_use]
    pub fn queue_index(&self) -> u16 {
        self.queue_index.load(Ordering::Relaxed)
    }

    /// The receive hash recorded by the transmit side, 0 if none.
    #[must_use]
    pub fn rps_rxhash(&self) -> u32 {
        self.rps_rxhash.load(Ordering::Relaxed)
    }

    /// Time of the last refresh.
    #[must_use]
    pub fn updated(&self) -> Duration {
        Duration::from_nanos(self.updated.load(Ordering::Relaxed))
    }

    fn expires(&self, ageing: Duration) -> Duration {
        self.updated().saturating_add(ageing)
    }
}

type Chain = Vec<Arc<FlowEntry>>;

/// State owned by the writer lock.
#[derive(Debug, Default)]
struct Writer {
    /// When the garbage collection timer fires next, if armed.
    deadline: Option<Duration>,
    /// Set when the timer must never fire again.
    stopped: bool,
}

/// A hash → queue affinity cache with ageing.
#[derive(Debug)]
pub struct FlowCache {
    buckets: Box<[ArcSwap<Chain>]>,
    writer: Mutex<Writer>,
    timer: Condvar,
    count: AtomicUsize,
    ageing: AtomicU64,
    clock: Arc<dyn Clock>,
}

fn bucket_of(hash: u32) -> usize {
    (hash as usize) & (FLOW_BUCKETS - 1)
}

impl FlowCache {
    /// An empty cache with the given ageing time.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ageing: Duration) -> Self {
        let buckets = (0..FLOW_BUCKETS)
            .map(|_| ArcSwap::from_pointee(Chain::new()))
            .collect();
        Self {
            buckets,
            writer: Mutex::new(Writer::default()),
            timer: Condvar::new(),
            count: AtomicUsize::new(0),
            ageing: AtomicU64::new(as_nanos(ageing)),
            clock,
        }
    }

    /// The clock driving this cache.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current ageing time.
    #[must_use]
    pub fn ageing(&self) -> Duration {
        Duration::from_nanos(self.ageing.load(Ordering::Relaxed))
    }

    /// Change the ageing time.  Takes effect at the next refresh or collection.
    pub fn set_ageing(&self, ageing: Duration) {
        self.ageing.store(as_nanos(ageing), Ordering::Relaxed);
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Returns true if the cache holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the entry for `hash` without taking any lock.
    #[must_use]
    pub fn find(&self, hash: u32) -> Option<Arc<FlowEntry>> {
        self.buckets[bucket_of(hash)]
            .load()
            .iter()
            .find(|e| e.hash == hash)
            .cloned()
    }

    /// The queue remembered for `hash`, if any.
    #[must_use]
    pub fn lookup(&self, hash: u32) -> Option<u16> {
        self.find(hash).map(|e| e.queue_index())
    }

    /// Remember that `queue_index` carried a packet of flow `hash`.
    ///
    /// A hit refreshes the entry (the most recent writer wins).  A miss inserts a new entry
    /// unless the cache is full, and arms the collection timer if it is idle.
    pub fn update(&self, hash: u32, queue_index: u16) {
        let now = self.clock.now();
        if let Some(entry) = self.find(hash) {
            if entry.queue_index() != queue_index {
                entry.queue_index.store(queue_index, Ordering::Relaxed);
            }
            let now = as_nanos(now);
            if entry.updated.load(Ordering::Relaxed) != now {
                entry.updated.store(now, Ordering::Relaxed);
            }
            return;
        }
        let mut writer = self.writer.lock();
        let bucket = &self.buckets[bucket_of(hash)];
        let chain = bucket.load();
        if !chain.iter().any(|e| e.hash == hash) && self.len() < MAX_FLOW_ENTRIES {
            let mut next = Chain::with_capacity(chain.len() + 1);
            next.push(Arc::new(FlowEntry::new(hash, queue_index, now)));
            next.extend(chain.iter().cloned());
            bucket.store(Arc::new(next));
            self.count.fetch_add(1, Ordering::Relaxed);
            trace!(hash, queue_index, "flow created");
        }
        if writer.deadline.is_none() {
            self.arm(&mut writer, now.saturating_add(self.ageing()));
        }
    }

    /// Record the receive hash the transmit side computed for `entry`.
    pub fn save_rps_rxhash(entry: &FlowEntry, hash: u32) {
        if entry.rps_rxhash() != hash {
            entry.rps_rxhash.store(hash, Ordering::Relaxed);
        }
    }

    /// Rewrite every bucket, keeping the entries `keep` accepts.  Returns the number removed.
    fn retain(
        &self,
        _writer: &mut MutexGuard<'_, Writer>,
        keep: impl Fn(&FlowEntry) -> bool,
    ) -> usize {
        let mut removed = 0;
        for bucket in &*self.buckets {
            let chain = bucket.load();
            if chain.is_empty() {
                continue;
            }
            let next: Chain = chain.iter().filter(|e| keep(e)).cloned().collect();
            if next.len() != chain.len() {
                removed += chain.len() - next.len();
                bucket.store(Arc::new(next));
            }
        }
        self.count.fetch_sub(removed, Ordering::Relaxed);
        removed
    }

    /// Remove every entry.
    pub fn flush_all(&self) {
        let mut writer = self.writer.lock();
        let removed = self.retain(&mut writer, |_| false);
        debug!(removed, "flow cache flushed");
    }

    /// Remove every entry pointing at `queue_index`.
    pub fn flush_by_queue(&self, queue_index: u16) {
        let mut writer = self.writer.lock();
        let removed = self.retain(&mut writer, |e| e.queue_index() != queue_index);
        debug!(removed, queue_index, "flows flushed for queue");
    }

    /// Remove every entry idle for at least the ageing time.
    ///
    /// Re-arms the timer for the soonest remaining expiry, or disarms it if nothing remains.
    /// Returns the number of entries removed.
    pub fn garbage_collect(&self) -> usize {
        let mut writer = self.writer.lock();
        self.collect_locked(&mut writer)
    }

    fn collect_locked(&self, writer: &mut MutexGuard<'_, Writer>) -> usize {
        let now = self.clock.now();
        let ageing = self.ageing();
        let removed = self.retain(writer, |e| e.expires(ageing) > now);
        let next = self
            .buckets
            .iter()
            .flat_map(|b| b.load().iter().map(|e| e.expires(ageing)).collect::<Vec<_>>())
            .min();
        match next {
            Some(deadline) => self.arm(writer, deadline),
            None => writer.deadline = None,
        }
        trace!(removed, remaining = self.len(), "flow cache collected");
        removed
    }

    fn arm(&self, writer: &mut MutexGuard<'_, Writer>, deadline: Duration) {
        if writer.stopped {
            return;
        }
        writer.deadline = Some(deadline);
        self.timer.notify_all();
    }

    /// When the collection timer fires next, `None` if disarmed.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.writer.lock().deadline
    }

    /// Run a collection if the timer is armed and due.  Returns true if it ran.
    pub fn run_expired_timer(&self) -> bool {
        let mut writer = self.writer.lock();
        match writer.deadline {
            Some(deadline) if deadline <= self.clock.now() => {
                writer.deadline = None;
                self.collect_locked(&mut writer);
                true
            }
            _ => false,
        }
    }

    /// Disarm the timer for good (device teardown).
    pub fn stop_timer(&self) {
        let mut writer = self.writer.lock();
        writer.stopped = true;
        writer.deadline = None;
        self.timer.notify_all();
    }

    /// Block for at most `max` until the timer is due, stopped, or re-armed.
    ///
    /// Returns false once the timer has been stopped.
    pub(crate) fn wait_timer(&self, max: Duration) -> bool {
        let mut writer = self.writer.lock();
        if writer.stopped {
            return false;
        }
        let wait = writer
            .deadline
            .map_or(max, |d| d.saturating_sub(self.clock.now()).min(max));
        if !wait.is_zero() {
            let _ = self.timer.wait_for(&mut writer, wait);
        }
        !writer.stopped
    }

    /// Entries in bucket order, for display and tests.
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<FlowEntry>> {
        self.buckets
            .iter()
            .flat_map(|b| b.load().iter().cloned().collect::<Vec<_>>())
            .collect()
    }
}
