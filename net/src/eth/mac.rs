// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Mac address type and logic.

use std::fmt::{Display, Formatter};

/// A [MAC Address] type.
///
/// `Mac` is a transparent wrapper around `[u8; 6]` which provides a
/// small collection of methods and type safety.
///
/// [MAC Address]: https://en.wikipedia.org/wiki/MAC_address
#[must_use]
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(any(test, feature = "bolero"), derive(bolero::TypeGenerator))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mac(pub [u8; 6]);

impl From<[u8; 6]> for Mac {
    fn from(value: [u8; 6]) -> Self {
        Mac(value)
    }
}

impl From<Mac> for [u8; 6] {
    fn from(value: Mac) -> Self {
        value.0
    }
}

impl AsRef<[u8; 6]> for Mac {
    #[must_use]
    fn as_ref(&self) -> &[u8; 6] {
        &self.0
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// The polynomial used by the ethernet frame check sequence, in its big-endian form.
const ETHERNET_POLYNOMIAL: u32 = 0x04c1_1db7;

/// Number of bits selected from the CRC to index the multicast hash mask.
const MULTICAST_HASH_BITS: u32 = 6;

impl Mac {
    /// The broadcast `Mac`
    pub const BROADCAST: Mac = Mac([u8::MAX; 6]);
    /// The zero `Mac`.
    ///
    /// `ZERO` is illegal as a source or destination `Mac` in most contexts.
    pub const ZERO: Mac = Mac([0; 6]);

    /// Returns true iff the binary representation of the [`Mac`] is exclusively ones.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self == &Mac::BROADCAST
    }

    /// Returns true iff the least significant bit of the first octet of the `[Mac]` is one.
    ///
    /// Note that the broadcast [`Mac`] is also a multicast [`Mac`].
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    /// Returns true iff the least significant bit of the first octet of the `[Mac]` is zero.
    #[must_use]
    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    /// Returns true iff the binary representation of the [`Mac`] is exclusively zeros.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self == &Mac::ZERO
    }

    /// Returns true iff the second least significant bit of the first octet is one.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// Returns true iff the [`Mac`] may be assigned to an interface.
    ///
    /// Multicast and zero are not legal interface addresses.
    #[must_use]
    pub fn is_valid_src(&self) -> bool {
        !self.is_zero() && !self.is_multicast()
    }

    /// The big-endian CRC-32 of the address, bits consumed least significant first.
    ///
    /// This is the CRC ethernet controllers traditionally use to index their multicast hash
    /// tables.
    #[must_use]
    pub fn ether_crc(&self) -> u32 {
        let mut crc = u32::MAX;
        for octet in self.0 {
            let mut octet = octet;
            for _ in 0..8 {
                let carry = (crc >> 31) ^ u32::from(octet & 1);
                crc <<= 1;
                if carry != 0 {
                    crc ^= ETHERNET_POLYNOMIAL;
                }
                octet >>= 1;
            }
        }
        crc
    }

    /// Index (in `0..64`) of this address in a 64-bit multicast hash mask.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // at most 6 bits survive the shift
    pub fn multicast_hash_bit(&self) -> u8 {
        (self.ether_crc() >> (u32::BITS - MULTICAST_HASH_BITS)) as u8
    }
}
