// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Out of band packet metadata.

use crate::vlan::VlanTag;

/// Checksum state of a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Checksum {
    /// Nothing is known about the checksum.
    #[default]
    None,
    /// The checksum was verified (or need not be).
    Unnecessary,
    /// The checksum must still be computed: sum from `start` to the end of the packet and store
    /// the result at `start + offset`.
    Partial {
        /// Offset at which summing starts.
        start: u16,
        /// Offset of the checksum field, relative to `start`.
        offset: u16,
    },
}

/// Segmentation offload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GsoKind {
    /// TCP over IPv4.
    TcpV4,
    /// TCP over IPv6.
    TcpV6,
    /// UDP fragmentation offload.
    Udp,
    /// UDP segmentation (L4).
    UdpL4,
    /// Segmentation of an encapsulated packet, which the offload header cannot describe.
    Encapsulated,
}

/// Segmentation offload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Gso {
    /// The segmentation type.
    pub kind: GsoKind,
    /// Payload size of each segment.
    pub size: u16,
    /// Set when the TCP ECN (CWR) bit must be honored while segmenting.
    pub ecn: bool,
}

/// Metadata travelling with a [`PacketBuf`](super::PacketBuf).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PacketMeta {
    /// Network protocol (ethertype) of the payload.
    pub protocol: u16,
    /// Checksum offload state.
    pub csum: Checksum,
    /// Segmentation offload state.
    pub gso: Option<Gso>,
    /// A vlan tag held out of band.
    pub vlan: Option<VlanTag>,
    /// Queue the packet was received on.
    pub rx_queue: Option<u16>,
    /// Flow hash, if one was computed.
    pub hash: Option<u32>,
}
