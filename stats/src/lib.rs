// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-device packet counters.
//!
//! Every thread touching a device gets its own cache line of counters, so the packet path never
//! contends on a shared atomic.  Reading merges all shards into a [`StatsSnapshot`].

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used)]

use crossbeam_utils::CachePadded;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use thread_local::ThreadLocal;

#[derive(Debug, Default)]
struct Counters {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    rx_dropped: AtomicU64,
    tx_dropped: AtomicU64,
    rx_frame_errors: AtomicU64,
    rx_exceptions: AtomicU64,
}

/// Merged view of a device's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Packets written by user space and handed to the stack.
    pub rx_packets: u64,
    /// Bytes written by user space and handed to the stack.
    pub rx_bytes: u64,
    /// Packets read by user space.
    pub tx_packets: u64,
    /// Bytes read by user space (vlan tags included).
    pub tx_bytes: u64,
    /// Writes which failed or were dropped.
    pub rx_dropped: u64,
    /// Packets from the stack which were dropped before reaching a reader.
    pub tx_dropped: u64,
    /// Writes whose offload header did not match the packet.
    pub rx_frame_errors: u64,
    /// Writes aborted by a fast-path program.
    pub rx_exceptions: u64,
}

/// Counters of a single device, sharded per thread.
#[derive(Debug, Default)]
pub struct DeviceStats {
    shards: ThreadLocal<CachePadded<Counters>>,
}

macro_rules! bump {
    ($(#[$doc:meta] $name:ident),* $(,)?) => {
        $(
            #[$doc]
            pub fn $name(&self) {
                self.shard().$name.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl DeviceStats {
    /// Fresh, zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self) -> &Counters {
        self.shards.get_or_default()
    }

    /// Count a packet handed to the stack.
    pub fn rx(&self, bytes: usize) {
        let shard = self.shard();
        shard.rx_packets.fetch_add(1, Ordering::Relaxed);
        shard.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count a packet delivered to user space.
    pub fn tx(&self, bytes: usize) {
        let shard = self.shard();
        shard.tx_packets.fetch_add(1, Ordering::Relaxed);
        shard.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    bump! {
        /// Count a dropped write.
        rx_dropped,
        /// Count a packet dropped on its way to user space.
        tx_dropped,
        /// Count a malformed offload header.
        rx_frame_errors,
        /// Count a write aborted by a fast-path program.
        rx_exceptions,
    }

    /// Merge every shard.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.shards
            .iter()
            .fold(StatsSnapshot::default(), |mut acc, shard| {
                acc.rx_packets += shard.rx_packets.load(Ordering::Relaxed);
                acc.rx_bytes += shard.rx_bytes.load(Ordering::Relaxed);
                acc.tx_packets += shard.tx_packets.load(Ordering::Relaxed);
                acc.tx_bytes += shard.tx_bytes.load(Ordering::Relaxed);
                acc.rx_dropped += shard.rx_dropped.load(Ordering::Relaxed);
                acc.tx_dropped += shard.tx_dropped.load(Ordering::Relaxed);
                acc.rx_frame_errors += shard.rx_frame_errors.load(Ordering::Relaxed);
                acc.rx_exceptions += shard.rx_exceptions.load(Ordering::Relaxed);
                acc
            })
    }
}
