// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ethernet type related fields

use etherparse::EtherType;
use std::fmt::{Display, Formatter};

/// The ethernet header's ethertype field.
///
/// This is a transparent wrapper around the type provided by etherparse.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub struct EthType(pub(crate) EtherType);

/// Errors which may occur when mapping a raw `u16` into an [`EthType`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EthTypeError {
    /// Values up to 1500 are frame lengths (802.3), not ethertypes.
    #[error("EthType smaller than 0x5dc (1500) are historical and are not supported: received {0}")]
    EthernetIIUnsupported(u16),
    /// Values between 1501 and 1536 have no defined meaning.
    #[error(
        "EthType values between 1501 (0x05dd) and 1536 (0x600) (inclusive) have ambiguous meaning.  Received {0}"
    )]
    Ambiguous(u16),
}

impl Display for EthType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0.0)
    }
}

impl EthType {
    /// Ethernet type for [address resolution protocol](https://en.wikipedia.org/wiki/Address_Resolution_Protocol)
    pub const ARP: EthType = EthType(EtherType::ARP);
    /// Ethernet type for [IPv4](https://en.wikipedia.org/wiki/IPv4)
    pub const IPV4: EthType = EthType(EtherType::IPV4);
    /// Ethernet type for [IPv6](https://en.wikipedia.org/wiki/IPv6)
    pub const IPV6: EthType = EthType(EtherType::IPV6);
    /// Ethernet type for [VLAN](https://en.wikipedia.org/wiki/IEEE_802.1Q)
    pub const VLAN: EthType = EthType(EtherType::VLAN_TAGGED_FRAME);
    /// Ethernet type for [QinQ (aka provider bridging)](https://en.wikipedia.org/wiki/IEEE_802.1ad)
    pub const VLAN_QINQ: EthType = EthType(EtherType::PROVIDER_BRIDGING);

    /// Map a raw (native-endian) u16 into an [`EthType`]
    ///
    /// # Errors
    ///
    /// Returns an [`EthTypeError`] if raw is a legacy or ambiguously defined ethertype.
    pub const fn new(raw: u16) -> Result<EthType, EthTypeError> {
        match raw {
            0..=1500 => Err(EthTypeError::EthernetIIUnsupported(raw)),
            1501..=0x600 => Err(EthTypeError::Ambiguous(raw)),
            _ => Ok(EthType(EtherType(raw))),
        }
    }

    /// The [`EthType`] matching the version nibble of a raw IP packet.
    ///
    /// Returns `None` for anything but 4 and 6.
    #[must_use]
    pub const fn from_ip_version(version: u8) -> Option<EthType> {
        match version {
            4 => Some(EthType::IPV4),
            6 => Some(EthType::IPV6),
            _ => None,
        }
    }

    /// Returns true if frames of this type carry an 802.1Q / 802.1ad tag.
    #[must_use]
    pub const fn is_vlan(self) -> bool {
        let raw = self.0.0;
        raw == EtherType::VLAN_TAGGED_FRAME.0 || raw == EtherType::PROVIDER_BRIDGING.0
    }

    /// get the raw `u16` value (native-endian)
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self.0.0
    }
}

impl TryFrom<u16> for EthType {
    type Error = EthTypeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        EthType::new(value)
    }
}

impl From<EthType> for u16 {
    fn from(value: EthType) -> Self {
        value.to_u16()
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use super::EthType;
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for EthType {
        fn generate<D: Driver>(u: &mut D) -> Option<Self> {
            let raw = match u.produce::<u16>()? {
                0..=1536 => 0x800,
                other => other,
            };
            EthType::new(raw).ok()
        }
    }
}
