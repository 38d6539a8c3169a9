// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow affinity cache.
//!
//! Remembers, per flow hash, which queue most recently submitted a packet of that flow so the
//! transmit side can steer replies back to the same queue.  Entries age out; a timer (driven by
//! [`gc::FlowGc`] or by hand in tests) reclaims them.

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used)]

pub mod clock;
pub mod flow_table;
pub mod gc;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use flow_table::{FlowCache, FlowEntry};
