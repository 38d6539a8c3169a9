// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! 802.1Q tags carried out of band in packet metadata.

use crate::eth::ethtype::EthType;

/// Length of an 802.1Q tag on the wire (tag protocol id + tag control information).
pub const VLAN_HLEN: usize = 4;

/// Offset at which a tag is inserted into an ethernet frame (right after the two addresses).
pub const VLAN_OFFSET: usize = 12;

/// Mask selecting the vlan id out of the tag control information.
const VID_MASK: u16 = 0x0fff;

/// A VLAN tag which the stack has stripped from a frame (hardware acceleration style).
///
/// The tag is re-inserted at [`VLAN_OFFSET`] when the frame is serialized to a reader.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VlanTag {
    /// The tag protocol identifier (normally [`EthType::VLAN`] or [`EthType::VLAN_QINQ`]).
    pub proto: EthType,
    /// The tag control information: priority (3 bits), drop eligibility (1 bit), id (12 bits).
    pub tci: u16,
}

impl VlanTag {
    /// Build an 802.1Q tag from its control information.
    #[must_use]
    pub const fn dot1q(tci: u16) -> VlanTag {
        VlanTag {
            proto: EthType::VLAN,
            tci,
        }
    }

    /// The 12 bit vlan id.
    #[must_use]
    pub const fn vid(&self) -> u16 {
        self.tci & VID_MASK
    }

    /// The priority code point.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // 3 bits
    pub const fn pcp(&self) -> u8 {
        (self.tci >> 13) as u8
    }

    /// The tag as it appears on the wire.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; VLAN_HLEN] {
        let [p0, p1] = self.proto.to_u16().to_be_bytes();
        let [t0, t1] = self.tci.to_be_bytes();
        [p0, p1, t0, t1]
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use super::VlanTag;
    use crate::eth::ethtype::EthType;
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for VlanTag {
        fn generate<D: Driver>(u: &mut D) -> Option<Self> {
            let proto = if u.produce::<bool>()? {
                EthType::VLAN
            } else {
                EthType::VLAN_QINQ
            };
            Some(VlanTag {
                proto,
                tci: u.produce()?,
            })
        }
    }
}
