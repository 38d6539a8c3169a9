// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ethernet types

pub mod ethtype;
pub mod mac;

use crate::eth::ethtype::EthType;
use crate::eth::mac::Mac;

/// Length of an ethernet (II) header: two [`Mac`] and one [`EthType`].
pub const ETH_HLEN: usize = 14;

/// Length of a [`Mac`] in octets.
pub const ETH_ALEN: usize = 6;

/// Offset of the ethertype field in an ethernet header.
pub const ETH_TYPE_OFFSET: usize = 2 * ETH_ALEN;

/// A borrowed view of the ethernet header at the start of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthHeader<'a>(&'a [u8; ETH_HLEN]);

impl<'a> EthHeader<'a> {
    /// View the first [`ETH_HLEN`] octets of `frame` as an ethernet header.
    ///
    /// Returns `None` if the frame is too short.
    #[must_use]
    pub fn new(frame: &'a [u8]) -> Option<Self> {
        frame.first_chunk::<ETH_HLEN>().map(EthHeader)
    }

    /// The destination [`Mac`] of the frame.
    pub fn destination(&self) -> Mac {
        let mut mac = [0; ETH_ALEN];
        mac.copy_from_slice(&self.0[..ETH_ALEN]);
        Mac(mac)
    }

    /// The source [`Mac`] of the frame.
    pub fn source(&self) -> Mac {
        let mut mac = [0; ETH_ALEN];
        mac.copy_from_slice(&self.0[ETH_ALEN..ETH_TYPE_OFFSET]);
        Mac(mac)
    }

    /// The raw (host order) ethertype carried by the frame.
    #[must_use]
    pub fn ether_type_raw(&self) -> u16 {
        u16::from_be_bytes([self.0[ETH_TYPE_OFFSET], self.0[ETH_TYPE_OFFSET + 1]])
    }

    /// The ethertype carried by the frame, if it is a legal modern [`EthType`].
    #[must_use]
    pub fn ether_type(&self) -> Option<EthType> {
        EthType::new(self.ether_type_raw()).ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_view_reads_fields() {
        let frame = [
            0x01, 0x00, 0x5e, 0x00, 0x00, 0x01, // dst
            0x02, 0x00, 0x00, 0x00, 0x00, 0x02, // src
            0x08, 0x00, // ipv4
            0x45,
        ];
        let eth = EthHeader::new(&frame).unwrap();
        assert_eq!(eth.destination(), Mac([0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]));
        assert_eq!(eth.source(), Mac([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]));
        assert_eq!(eth.ether_type(), Some(EthType::IPV4));
    }

    #[test]
    fn short_frame_has_no_header() {
        assert!(EthHeader::new(&[0u8; ETH_HLEN - 1]).is_none());
    }
}
