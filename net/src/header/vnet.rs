// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The virtio-net offload header.
//!
//! When enabled, the header precedes every packet (after the packet information prefix) and
//! carries checksum and segmentation offload requests in both directions.  Multi-byte fields are
//! in the byte order selected for the device.

use crate::packet::{Checksum, Gso, GsoKind, PacketMeta};

/// Length of the basic offload header.
pub const VNET_HDR_LEN: usize = 10;

/// Header flag: the checksum must be completed from `csum_start` at `csum_offset`.
pub const VNET_F_NEEDS_CSUM: u8 = 1;
/// Header flag: the checksum has been validated.
pub const VNET_F_DATA_VALID: u8 = 2;

/// Segmentation type: no segmentation requested.
pub const VNET_GSO_NONE: u8 = 0;
/// Segmentation type: TCP over IPv4.
pub const VNET_GSO_TCPV4: u8 = 1;
/// Segmentation type: UDP fragmentation.
pub const VNET_GSO_UDP: u8 = 3;
/// Segmentation type: TCP over IPv6.
pub const VNET_GSO_TCPV6: u8 = 4;
/// Segmentation type: UDP segmentation.
pub const VNET_GSO_UDP_L4: u8 = 5;
/// Segmentation type modifier: honor ECN.
pub const VNET_GSO_ECN: u8 = 0x80;

/// Offset of the checksum field in a UDP header.
const UDP_CSUM_OFFSET: u16 = 6;

/// Byte order of the multi-byte offload header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(any(test, feature = "bolero"), derive(bolero::TypeGenerator))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endian {
    /// Little endian.
    Little,
    /// Big endian.
    Big,
}

impl Endian {
    /// The byte order of the machine we are running on.
    #[must_use]
    pub const fn native() -> Endian {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    fn read(self, bytes: [u8; 2]) -> u16 {
        match self {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        }
    }

    fn write(self, value: u16) -> [u8; 2] {
        match self {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        }
    }
}

/// Ways an offload header may be inconsistent with its packet or metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VnetHdrError {
    /// The segmentation type is not one we know.
    #[error("unknown segmentation type {0:#x}")]
    UnknownGsoType(u8),
    /// Segmentation was requested with a zero segment size.
    #[error("segmentation requested with a zero segment size")]
    ZeroGsoSize,
    /// The checksum location lies outside of the packet.
    #[error("checksum at {start}+{offset} does not fit a {len} byte packet")]
    ChecksumOutOfBounds {
        /// Checksum start.
        start: u16,
        /// Checksum offset.
        offset: u16,
        /// Packet length.
        len: usize,
    },
    /// The checksum offset does not point at the checksum field of the transport header.
    #[error("checksum offset {0} is wrong for the segmentation type")]
    BadChecksumOffset(u16),
    /// The packet metadata requests an offload the header can not describe.
    #[error("packet offload state can not be described by the offload header")]
    Unrepresentable,
}

/// The basic virtio-net offload header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(any(test, feature = "bolero"), derive(bolero::TypeGenerator))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VnetHdr {
    /// `VNET_F_*` flags.
    pub flags: u8,
    /// `VNET_GSO_*` type, possibly with [`VNET_GSO_ECN`].
    pub gso_type: u8,
    /// Length of the headers to replicate into every segment.
    pub hdr_len: u16,
    /// Segment payload size.
    pub gso_size: u16,
    /// Where checksumming starts.
    pub csum_start: u16,
    /// Where the checksum is stored, relative to `csum_start`.
    pub csum_offset: u16,
}

impl VnetHdr {
    /// Decode a header.
    #[must_use]
    pub fn parse(bytes: &[u8; VNET_HDR_LEN], endian: Endian) -> VnetHdr {
        VnetHdr {
            flags: bytes[0],
            gso_type: bytes[1],
            hdr_len: endian.read([bytes[2], bytes[3]]),
            gso_size: endian.read([bytes[4], bytes[5]]),
            csum_start: endian.read([bytes[6], bytes[7]]),
            csum_offset: endian.read([bytes[8], bytes[9]]),
        }
    }

    /// Encode the header.
    #[must_use]
    pub fn to_bytes(&self, endian: Endian) -> [u8; VNET_HDR_LEN] {
        let mut out = [0u8; VNET_HDR_LEN];
        out[0] = self.flags;
        out[1] = self.gso_type;
        out[2..4].copy_from_slice(&endian.write(self.hdr_len));
        out[4..6].copy_from_slice(&endian.write(self.gso_size));
        out[6..8].copy_from_slice(&endian.write(self.csum_start));
        out[8..10].copy_from_slice(&endian.write(self.csum_offset));
        out
    }

    /// Returns true if the writer asked for the checksum to be completed.
    #[must_use]
    pub fn needs_csum(&self) -> bool {
        self.flags & VNET_F_NEEDS_CSUM != 0
    }

    /// Grow `hdr_len` so that it covers the checksum field, if one is requested.
    #[must_use]
    pub fn clamped(mut self) -> VnetHdr {
        if self.needs_csum() {
            let csum_end = u32::from(self.csum_start) + u32::from(self.csum_offset) + 2;
            if csum_end > u32::from(self.hdr_len) {
                self.hdr_len = u16::try_from(csum_end).unwrap_or(u16::MAX);
            }
        }
        self
    }

    /// Translate the header into packet metadata for a packet of `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`VnetHdrError`] if the header is inconsistent.  `meta` is left unchanged in
    /// that case.
    pub fn apply(&self, meta: &mut PacketMeta, len: usize) -> Result<(), VnetHdrError> {
        let gso = match self.gso_type & !VNET_GSO_ECN {
            VNET_GSO_NONE => None,
            VNET_GSO_TCPV4 => Some(GsoKind::TcpV4),
            VNET_GSO_TCPV6 => Some(GsoKind::TcpV6),
            VNET_GSO_UDP => Some(GsoKind::Udp),
            VNET_GSO_UDP_L4 => Some(GsoKind::UdpL4),
            other => return Err(VnetHdrError::UnknownGsoType(other)),
        };
        let csum = if self.needs_csum() {
            let csum_end = usize::from(self.csum_start) + usize::from(self.csum_offset) + 2;
            if csum_end > len {
                return Err(VnetHdrError::ChecksumOutOfBounds {
                    start: self.csum_start,
                    offset: self.csum_offset,
                    len,
                });
            }
            if gso == Some(GsoKind::UdpL4) && self.csum_offset != UDP_CSUM_OFFSET {
                return Err(VnetHdrError::BadChecksumOffset(self.csum_offset));
            }
            Checksum::Partial {
                start: self.csum_start,
                offset: self.csum_offset,
            }
        } else if self.flags & VNET_F_DATA_VALID != 0 {
            Checksum::Unnecessary
        } else {
            Checksum::None
        };
        let gso = match gso {
            Some(_) if self.gso_size == 0 => return Err(VnetHdrError::ZeroGsoSize),
            Some(kind) => Some(Gso {
                kind,
                size: self.gso_size,
                ecn: self.gso_type & VNET_GSO_ECN != 0,
            }),
            None => None,
        };
        meta.csum = csum;
        meta.gso = gso;
        Ok(())
    }

    /// Build the header describing a packet on its way to user space.
    ///
    /// `linear_len` is the length of the packet's linear area and `vlan_hlen` the length of a
    /// vlan tag which will be inserted in front of the network header (shifting checksum
    /// offsets).
    ///
    /// # Errors
    ///
    /// Returns [`VnetHdrError::Unrepresentable`] if the metadata requests segmentation of a
    /// kind the header can not express.
    pub fn from_meta(
        meta: &PacketMeta,
        linear_len: usize,
        vlan_hlen: usize,
    ) -> Result<VnetHdr, VnetHdrError> {
        let mut hdr = VnetHdr::default();
        if let Some(gso) = meta.gso {
            hdr.gso_type = match gso.kind {
                GsoKind::TcpV4 => VNET_GSO_TCPV4,
                GsoKind::TcpV6 => VNET_GSO_TCPV6,
                GsoKind::Udp => VNET_GSO_UDP,
                GsoKind::UdpL4 => VNET_GSO_UDP_L4,
                GsoKind::Encapsulated => return Err(VnetHdrError::Unrepresentable),
            };
            if gso.ecn {
                hdr.gso_type |= VNET_GSO_ECN;
            }
            hdr.hdr_len = u16::try_from(linear_len).map_err(|_| VnetHdrError::Unrepresentable)?;
            hdr.gso_size = gso.size;
        }
        match meta.csum {
            Checksum::Partial { start, offset } => {
                let vlan_hlen =
                    u16::try_from(vlan_hlen).map_err(|_| VnetHdrError::Unrepresentable)?;
                hdr.flags = VNET_F_NEEDS_CSUM;
                hdr.csum_start = start
                    .checked_add(vlan_hlen)
                    .ok_or(VnetHdrError::Unrepresentable)?;
                hdr.csum_offset = offset;
            }
            Checksum::Unnecessary => hdr.flags = VNET_F_DATA_VALID,
            Checksum::None => {}
        }
        Ok(hdr)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_inverts_to_bytes() {
        bolero::check!()
            .with_type()
            .cloned()
            .for_each(|(hdr, endian): (VnetHdr, Endian)| {
                assert_eq!(VnetHdr::parse(&hdr.to_bytes(endian), endian), hdr);
            });
    }

    #[test]
    fn byte_order_is_honored() {
        let hdr = VnetHdr {
            hdr_len: 0x0102,
            ..VnetHdr::default()
        };
        assert_eq!(&hdr.to_bytes(Endian::Big)[2..4], &[0x01, 0x02]);
        assert_eq!(&hdr.to_bytes(Endian::Little)[2..4], &[0x02, 0x01]);
    }

    #[test]
    fn hdr_len_is_clamped_to_cover_checksum() {
        let hdr = VnetHdr {
            flags: VNET_F_NEEDS_CSUM,
            hdr_len: 10,
            csum_start: 34,
            csum_offset: 16,
            ..VnetHdr::default()
        };
        assert_eq!(hdr.clamped().hdr_len, 52);
        let no_csum = VnetHdr {
            hdr_len: 10,
            csum_start: 34,
            ..VnetHdr::default()
        };
        assert_eq!(no_csum.clamped().hdr_len, 10);
    }

    #[test]
    fn apply_sets_offloads() {
        let hdr = VnetHdr {
            flags: VNET_F_NEEDS_CSUM,
            gso_type: VNET_GSO_TCPV4 | VNET_GSO_ECN,
            hdr_len: 54,
            gso_size: 1448,
            csum_start: 34,
            csum_offset: 16,
        };
        let mut meta = PacketMeta::default();
        hdr.apply(&mut meta, 3000).unwrap();
        assert_eq!(
            meta.csum,
            Checksum::Partial {
                start: 34,
                offset: 16
            }
        );
        assert_eq!(
            meta.gso,
            Some(Gso {
                kind: GsoKind::TcpV4,
                size: 1448,
                ecn: true
            })
        );
    }

    #[test]
    fn apply_rejects_inconsistent_headers() {
        let mut meta = PacketMeta::default();
        let unknown = VnetHdr {
            gso_type: 2,
            gso_size: 100,
            ..VnetHdr::default()
        };
        assert_eq!(
            unknown.apply(&mut meta, 100),
            Err(VnetHdrError::UnknownGsoType(2))
        );
        let zero = VnetHdr {
            gso_type: VNET_GSO_TCPV6,
            ..VnetHdr::default()
        };
        assert_eq!(zero.apply(&mut meta, 100), Err(VnetHdrError::ZeroGsoSize));
        let outside = VnetHdr {
            flags: VNET_F_NEEDS_CSUM,
            csum_start: 90,
            csum_offset: 16,
            ..VnetHdr::default()
        };
        assert!(matches!(
            outside.apply(&mut meta, 100),
            Err(VnetHdrError::ChecksumOutOfBounds { .. })
        ));
        assert_eq!(meta, PacketMeta::default());
    }

    #[test]
    fn from_meta_shifts_checksum_past_vlan() {
        let meta = PacketMeta {
            csum: Checksum::Partial {
                start: 34,
                offset: 6,
            },
            gso: Some(Gso {
                kind: GsoKind::UdpL4,
                size: 1200,
                ecn: false,
            }),
            ..PacketMeta::default()
        };
        let hdr = VnetHdr::from_meta(&meta, 42, 4).unwrap();
        assert_eq!(hdr.csum_start, 38);
        assert_eq!(hdr.gso_type, VNET_GSO_UDP_L4);
        assert_eq!(hdr.hdr_len, 42);
        assert_eq!(hdr.flags, VNET_F_NEEDS_CSUM);
    }

    #[test]
    fn encapsulated_segmentation_is_unrepresentable() {
        let meta = PacketMeta {
            gso: Some(Gso {
                kind: GsoKind::Encapsulated,
                size: 1400,
                ecn: false,
            }),
            ..PacketMeta::default()
        };
        assert_eq!(
            VnetHdr::from_meta(&meta, 100, 0),
            Err(VnetHdrError::Unrepresentable)
        );
    }
}
