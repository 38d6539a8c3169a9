// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Moving packets between user buffers and [`PacketBuf`](net::packet::PacketBuf)s.
//!
//! [`rx`] turns a user write into a packet for the stack; [`tx`] turns a packet from the stack
//! into bytes in a user buffer.

pub mod rx;
pub mod tx;

/// Bytes copied into the linear area of a zero-copy write when the offload header gives no
/// header length.
pub const GOODCOPY_LEN: usize = 128;

/// Default headroom reserved in front of written packets.
pub const NET_SKB_PAD: usize = 64;

/// Extra headroom given to ethernet frames so the network header ends up aligned.
pub const NET_IP_ALIGN: usize = 2;

/// Headroom reserved for fast-path programs on inline built packets.
pub const XDP_PACKET_HEADROOM: usize = 256;

/// Space the allocator keeps at the end of every packet page for bookkeeping.
pub const SKB_SHARED_INFO: usize = 320;

/// Headroom of inline built packets.
pub const TUN_RX_PAD: usize = NET_IP_ALIGN + NET_SKB_PAD;

/// Largest receive batch.
pub const NAPI_POLL_WEIGHT: u32 = 64;

const CACHE_LINE: usize = 64;

/// Round `len` up to a whole number of cache lines.
pub(crate) const fn data_align(len: usize) -> usize {
    len.div_ceil(CACHE_LINE) * CACHE_LINE
}
