// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The packet information prefix.
//!
//! Unless a device is configured without it, every packet exchanged with user space starts
//! with four bytes: a flags word in host byte order followed by the big-endian protocol.

/// Length of the packet information prefix.
pub const PI_LEN: usize = 4;

/// The packet information prefix.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(any(test, feature = "bolero"), derive(bolero::TypeGenerator))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PiHeader {
    /// Flags ([`PiHeader::TUN_PKT_STRIP`] is the only one defined).
    pub flags: u16,
    /// The ethertype of the packet which follows.
    pub proto: u16,
}

impl PiHeader {
    /// Set on read when the caller's buffer was too short for the whole packet.
    pub const TUN_PKT_STRIP: u16 = 0x0001;

    /// Decode a prefix.
    #[must_use]
    pub fn parse(bytes: &[u8; PI_LEN]) -> PiHeader {
        PiHeader {
            flags: u16::from_ne_bytes([bytes[0], bytes[1]]),
            proto: u16::from_be_bytes([bytes[2], bytes[3]]),
        }
    }

    /// Encode the prefix.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PI_LEN] {
        let [f0, f1] = self.flags.to_ne_bytes();
        let [p0, p1] = self.proto.to_be_bytes();
        [f0, f1, p0, p1]
    }

    /// Returns true if the packet was truncated on read.
    #[must_use]
    pub fn stripped(&self) -> bool {
        self.flags & Self::TUN_PKT_STRIP != 0
    }
}
