// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Destination MAC filter of tap devices.
//!
//! Up to [`FLT_EXACT_COUNT`] addresses match exactly; further (multicast) addresses set a bit
//! in a 64 bit hash mask.  The filter is read without locks: an update disables it, rewrites
//! the tables and re-enables it, so a concurrent reader may accept a few packets it should not
//! but never rejects one it should accept under the old or new rules.

use crate::error::TunError;
use net::eth::mac::Mac;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// Number of addresses matched exactly.
pub const FLT_EXACT_COUNT: usize = 8;

fn pack(mac: Mac) -> u64 {
    let [a, b, c, d, e, f] = mac.0;
    u64::from_be_bytes([0, 0, a, b, c, d, e, f])
}

/// The filter.  `count == 0` means everything passes.
#[derive(Debug, Default)]
pub struct MacFilter {
    count: AtomicUsize,
    exact: [AtomicU64; FLT_EXACT_COUNT],
    mask: AtomicU64,
}

impl MacFilter {
    /// A disabled filter.
    #[must_use]
    pub fn new() -> MacFilter {
        MacFilter::default()
    }

    /// Returns true if the filter is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.count.load(Ordering::Acquire) != 0
    }

    /// Should a frame for `dest` be delivered?
    #[must_use]
    pub fn accept(&self, dest: Mac) -> bool {
        let count = self.count.load(Ordering::Acquire);
        if count == 0 {
            return true;
        }
        let packed = pack(dest);
        if self.exact[..count]
            .iter()
            .any(|addr| addr.load(Ordering::Relaxed) == packed)
        {
            return true;
        }
        if dest.is_multicast() {
            let bit = dest.multicast_hash_bit();
            return self.mask.load(Ordering::Relaxed) & (1u64 << bit) != 0;
        }
        false
    }

    /// Disable the filter.
    pub fn disable(&self) {
        self.count.store(0, Ordering::Release);
    }

    /// Replace the filter rules.
    ///
    /// The first [`FLT_EXACT_COUNT`] addresses match exactly, the rest must be multicast and
    /// are hashed.  `all_multi` accepts every multicast address.  An empty list disables the
    /// filter.  Returns the number of exact entries.
    ///
    /// # Errors
    ///
    /// Returns [`TunError::NotApplicable`] if a hashed address is not multicast.  The filter is
    /// left disabled.
    pub fn update(&self, addrs: &[Mac], all_multi: bool) -> Result<usize, TunError> {
        if addrs.is_empty() {
            self.disable();
            return Ok(0);
        }
        self.disable();
        let nexact = addrs.len().min(FLT_EXACT_COUNT);
        for (slot, addr) in self.exact.iter().zip(&addrs[..nexact]) {
            slot.store(pack(*addr), Ordering::Relaxed);
        }
        let mut mask = 0u64;
        for addr in &addrs[nexact..] {
            if !addr.is_multicast() {
                debug!(%addr, "unicast address beyond the exact table, filter disabled");
                self.mask.store(0, Ordering::Relaxed);
                return Err(TunError::NotApplicable);
            }
            mask |= 1u64 << addr.multicast_hash_bit();
        }
        if all_multi {
            mask = u64::MAX;
        }
        self.mask.store(mask, Ordering::Relaxed);
        self.count.store(nexact, Ordering::Release);
        Ok(nexact)
    }
}
