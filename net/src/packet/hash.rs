// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Module to compute packet hashes
//!
//! The hash is symmetric: both directions of a flow hash to the same value, so a reply is
//! steered to the queue which carried the request.

use crate::eth::ethtype::EthType;
use crate::eth::ETH_TYPE_OFFSET;
use crate::packet::PacketBuf;
use crate::vlan::VLAN_HLEN;
use ahash::RandomState;
use etherparse::{IpNumber, Ipv4HeaderSlice, Ipv6HeaderSlice};
use std::hash::BuildHasher;
use std::net::IpAddr;

/// How far into a packet the hash looks for headers.
const HASH_PREFIX: usize = 128;

/// Fixed seeds: the hash must be stable across handles and devices.
const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// The framing of a packet handed to [`PacketBuf::flow_hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// The packet starts with an ethernet header (possibly followed by vlan tags).
    Ethernet,
    /// The packet starts with the network header; its protocol is in the metadata.
    Raw,
}

/// The fields a flow is identified by, in canonical (direction independent) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FlowKeys {
    addrs: (IpAddr, IpAddr),
    ports: (u16, u16),
    protocol: u8,
    ethertype: u16,
}

impl FlowKeys {
    fn canonical(mut self) -> FlowKeys {
        if self.addrs.1 < self.addrs.0
            || (self.addrs.0 == self.addrs.1 && self.ports.1 < self.ports.0)
        {
            self.addrs = (self.addrs.1, self.addrs.0);
            self.ports = (self.ports.1, self.ports.0);
        }
        self
    }
}

fn has_ports(protocol: IpNumber) -> bool {
    protocol == IpNumber::TCP || protocol == IpNumber::UDP || protocol == IpNumber::SCTP
}

fn ports(l4: &[u8]) -> (u16, u16) {
    match l4 {
        [s0, s1, d0, d1, ..] => (u16::from_be_bytes([*s0, *s1]), u16::from_be_bytes([*d0, *d1])),
        _ => (0, 0),
    }
}

fn dissect(l3: &[u8], ethertype: u16) -> Option<FlowKeys> {
    if ethertype == EthType::IPV4.to_u16() {
        let ip = Ipv4HeaderSlice::from_slice(l3).ok()?;
        let protocol = ip.protocol();
        let l4 = &l3[ip.slice().len()..];
        let ports = if has_ports(protocol) && !ip.is_fragmenting_payload() {
            ports(l4)
        } else {
            (0, 0)
        };
        Some(FlowKeys {
            addrs: (ip.source_addr().into(), ip.destination_addr().into()),
            ports,
            protocol: protocol.0,
            ethertype,
        })
    } else if ethertype == EthType::IPV6.to_u16() {
        let ip = Ipv6HeaderSlice::from_slice(l3).ok()?;
        let protocol = ip.next_header();
        let l4 = &l3[ip.slice().len()..];
        let ports = if has_ports(protocol) {
            ports(l4)
        } else {
            (0, 0)
        };
        Some(FlowKeys {
            addrs: (ip.source_addr().into(), ip.destination_addr().into()),
            ports,
            protocol: protocol.0,
            ethertype,
        })
    } else {
        None
    }
}

/// Skip the ethernet header and any vlan tags, returning the inner ethertype and its offset.
fn skip_link(head: &[u8]) -> Option<(u16, usize)> {
    let mut offset = ETH_TYPE_OFFSET;
    loop {
        let raw = u16::from_be_bytes([*head.get(offset)?, *head.get(offset + 1)?]);
        match EthType::new(raw) {
            Ok(ethertype) if ethertype.is_vlan() => offset += VLAN_HLEN,
            _ => return Some((raw, offset + 2)),
        }
    }
}

impl PacketBuf {
    /// Computes a symmetric hash over the addresses, transport protocol and ports of the packet.
    ///
    /// Returns `None` if the packet carries neither IPv4 nor IPv6.  A computed hash is never
    /// zero.
    #[must_use]
    pub fn flow_hash(&self, link: Link) -> Option<u32> {
        let mut head = [0u8; HASH_PREFIX];
        let len = self.copy_out(0, &mut head);
        let head = &head[..len];
        let (ethertype, l3) = match link {
            Link::Ethernet => {
                let (ethertype, offset) = skip_link(head)?;
                (ethertype, head.get(offset..)?)
            }
            Link::Raw => (self.meta().protocol, head),
        };
        let keys = dissect(l3, ethertype)?.canonical();
        let hash = RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]).hash_one(keys);
        #[allow(clippy::cast_possible_truncation)] // folding 64 bits into 32
        let folded = (hash ^ (hash >> 32)) as u32;
        Some(if folded == 0 { 1 } else { folded })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketBuf;
    use etherparse::PacketBuilder;

    fn udp4(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> PacketBuf {
        let builder = PacketBuilder::ipv4(src, dst, 64).udp(sport, dport);
        let mut out = Vec::new();
        builder.write(&mut out, b"hello").unwrap();
        let mut pkt = PacketBuf::from_slice(&out);
        pkt.meta_mut().protocol = EthType::IPV4.to_u16();
        pkt
    }

    fn tcp6_eth(src: [u8; 16], dst: [u8; 16], sport: u16, dport: u16, vlan: bool) -> PacketBuf {
        let mut out = Vec::new();
        if vlan {
            PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
                .single_vlan(etherparse::VlanId::try_new(10).unwrap())
                .ipv6(src, dst, 64)
                .tcp(sport, dport, 1, 1024)
                .write(&mut out, b"data")
                .unwrap();
        } else {
            PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
                .ipv6(src, dst, 64)
                .tcp(sport, dport, 1, 1024)
                .write(&mut out, b"data")
                .unwrap();
        }
        PacketBuf::from_slice(&out)
    }

    #[test]
    fn hash_is_symmetric() {
        let forward = udp4([10, 0, 0, 1], [10, 0, 0, 2], 1000, 53);
        let reverse = udp4([10, 0, 0, 2], [10, 0, 0, 1], 53, 1000);
        assert!(forward.flow_hash(Link::Raw).is_some());
        assert_eq!(forward.flow_hash(Link::Raw), reverse.flow_hash(Link::Raw));
    }

    #[test]
    fn distinct_flows_hash_differently() {
        let a = udp4([10, 0, 0, 1], [10, 0, 0, 2], 1000, 53);
        let b = udp4([10, 0, 0, 1], [10, 0, 0, 2], 1001, 53);
        assert_ne!(a.flow_hash(Link::Raw), b.flow_hash(Link::Raw));
    }

    #[test]
    fn vlan_tags_are_skipped() {
        let src = [0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let dst = [0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];
        let tagged = tcp6_eth(src, dst, 4000, 80, true);
        let untagged = tcp6_eth(src, dst, 4000, 80, false);
        let reverse = tcp6_eth(dst, src, 80, 4000, false);
        assert_eq!(
            tagged.flow_hash(Link::Ethernet),
            untagged.flow_hash(Link::Ethernet)
        );
        assert_eq!(
            untagged.flow_hash(Link::Ethernet),
            reverse.flow_hash(Link::Ethernet)
        );
    }

    #[test]
    fn non_ip_has_no_hash() {
        let mut arp = vec![0xff; 12];
        arp.extend_from_slice(&[0x08, 0x06]);
        arp.extend_from_slice(&[0u8; 28]);
        assert_eq!(PacketBuf::from_slice(&arp).flow_hash(Link::Ethernet), None);
        assert_eq!(PacketBuf::from_slice(b"").flow_hash(Link::Raw), None);
    }

    #[test]
    fn garbage_never_hashes_to_zero() {
        bolero::check!()
            .with_type()
            .cloned()
            .for_each(|bytes: Vec<u8>| {
                let pkt = PacketBuf::from_slice(&bytes);
                assert_ne!(pkt.flow_hash(Link::Ethernet), Some(0));
                assert_ne!(pkt.flow_hash(Link::Raw), Some(0));
            });
    }
}
