// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Wire types and packet buffers shared by the virtual interface driver.
//!
//! This crate knows nothing about devices or queues.  It provides the pieces which describe
//! packets as they move between user buffers and the networking stack:
//!
//! - [`eth`]: [`Mac`] addresses (including the multicast hash used by the tap filter) and
//!   [`EthType`].
//! - [`vlan`]: 802.1Q tags which the stack may hand us out of band.
//! - [`header`]: the protocol-information prefix and the virtio-net offload header.
//! - [`packet`]: the [`PacketBuf`] object and its metadata, plus the symmetric flow hash.
//! - [`buffer`]: the buffer manipulation traits implemented by [`PacketBuf`] and the
//!   scatter/gather byte source used on the write path.
//!
//! [`Mac`]: eth::mac::Mac
//! [`EthType`]: eth::ethtype::EthType
//! [`PacketBuf`]: packet::PacketBuf

#![deny(
    unsafe_code,
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod eth;
pub mod header;
pub mod interface;
pub mod packet;
pub mod vlan;

/// Size of a memory page as seen by the buffer allocation heuristics.
pub const PAGE_SIZE: usize = 4096;
