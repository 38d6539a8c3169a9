// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Device and driver configuration.
//!
//! The flag sets are bit compatible with the Linux `IFF_*`, `TUN_F_*` and `POLL*` values so a
//! character device front end can pass them through unchanged.

use crate::error::TunError;
use bitflags::bitflags;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

bitflags! {
    /// Interface flags as passed to (and reported by) bind and status requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct TunFlags: u32 {
        /// Point to point device carrying network layer packets.
        const TUN = 0x0001;
        /// Ethernet device.
        const TAP = 0x0002;
        /// Accepted and reported; there is no polled receive path.
        const NAPI = 0x0010;
        /// Accepted and reported; there is no polled receive path.
        const NAPI_FRAGS = 0x0020;
        /// Bring the carrier down on bind.
        const NO_CARRIER = 0x0040;
        /// The device may carry more than one queue.
        const MULTI_QUEUE = 0x0100;
        /// Re-enable a detached queue.
        const ATTACH_QUEUE = 0x0200;
        /// Detach a queue, keeping the handle bound.
        const DETACH_QUEUE = 0x0400;
        /// Keep the device when the last handle closes.
        const PERSIST = 0x0800;
        /// Packets carry no protocol-information prefix.
        const NO_PI = 0x1000;
        /// Legacy; accepted and ignored.
        const ONE_QUEUE = 0x2000;
        /// Packets carry a virtio-net offload header.
        const VNET_HDR = 0x4000;
        /// Fail if the named device already exists.
        const TUN_EXCL = 0x8000;
        /// Offload header is big endian.
        const VNET_BE = 0x4000_0000;
        /// Offload header is little endian.
        const VNET_LE = 0x8000_0000;
    }
}

impl TunFlags {
    /// Reported by status when the handle has no socket filter.  Shares its bit with
    /// [`TunFlags::NO_PI`]; on bind it asks to skip re-attaching the device's filter.
    pub const NOFILTER: TunFlags = TunFlags::NO_PI;

    /// Flags a bind request may change on the device.
    pub const FEATURES: TunFlags = TunFlags::NO_PI
        .union(TunFlags::ONE_QUEUE)
        .union(TunFlags::VNET_HDR)
        .union(TunFlags::MULTI_QUEUE)
        .union(TunFlags::NAPI)
        .union(TunFlags::NAPI_FRAGS);

    /// Flags reported by a features query.
    pub const SUPPORTED: TunFlags = TunFlags::TUN.union(TunFlags::TAP).union(TunFlags::FEATURES);
}

bitflags! {
    /// Offload capabilities announced by user space (`TUN_F_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct OffloadFlags: u32 {
        /// User space can complete partial checksums.
        const CSUM = 0x01;
        /// TCP over IPv4 segmentation.
        const TSO4 = 0x02;
        /// TCP over IPv6 segmentation.
        const TSO6 = 0x04;
        /// Segmentation honoring ECN.
        const TSO_ECN = 0x08;
        /// UDP fragmentation; accepted and ignored.
        const UFO = 0x10;
        /// UDP segmentation over IPv4.
        const USO4 = 0x20;
        /// UDP segmentation over IPv6.
        const USO6 = 0x40;
    }
}

bitflags! {
    /// Features the device advertises to the stack, derived from [`OffloadFlags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct NetdevFeatures: u32 {
        /// Checksum offload.
        const HW_CSUM = 0x01;
        /// TCPv4 segmentation.
        const TSO = 0x02;
        /// TCPv6 segmentation.
        const TSO6 = 0x04;
        /// Segmentation with ECN.
        const TSO_ECN = 0x08;
        /// UDP segmentation.
        const GSO_UDP_L4 = 0x10;
    }
}

impl NetdevFeatures {
    /// Translate offload flags into device features.
    ///
    /// # Errors
    ///
    /// Returns [`TunError::InvalidArgument`] if any flag is left without a meaning, which lets
    /// user space test for support by trying.
    pub fn from_offload(offload: OffloadFlags) -> Result<NetdevFeatures, TunError> {
        let mut rest = offload;
        let mut features = NetdevFeatures::empty();
        if rest.contains(OffloadFlags::CSUM) {
            features |= NetdevFeatures::HW_CSUM;
            rest.remove(OffloadFlags::CSUM);
            if rest.intersects(OffloadFlags::TSO4 | OffloadFlags::TSO6) {
                if rest.contains(OffloadFlags::TSO_ECN) {
                    features |= NetdevFeatures::TSO_ECN;
                    rest.remove(OffloadFlags::TSO_ECN);
                }
                if rest.contains(OffloadFlags::TSO4) {
                    features |= NetdevFeatures::TSO;
                }
                if rest.contains(OffloadFlags::TSO6) {
                    features |= NetdevFeatures::TSO6;
                }
                rest.remove(OffloadFlags::TSO4 | OffloadFlags::TSO6);
            }
            rest.remove(OffloadFlags::UFO);
            // both or neither
            if rest.contains(OffloadFlags::USO4 | OffloadFlags::USO6) {
                features |= NetdevFeatures::GSO_UDP_L4;
                rest.remove(OffloadFlags::USO4 | OffloadFlags::USO6);
            }
        }
        if rest.is_empty() {
            Ok(features)
        } else {
            Err(TunError::InvalidArgument("unsupported offload flags"))
        }
    }
}

bitflags! {
    /// Readiness of a handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PollFlags: u16 {
        /// A packet is waiting.
        const IN = 0x0001;
        /// A write would not block.
        const OUT = 0x0004;
        /// The handle is unbound or its device is gone.
        const ERR = 0x0008;
        /// Same as [`PollFlags::IN`].
        const RDNORM = 0x0040;
        /// Same as [`PollFlags::OUT`].
        const WRNORM = 0x0100;
    }
}

/// The two flavours of device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Network layer packets, no link header.
    Tun,
    /// Ethernet frames.
    Tap,
}

impl DeviceKind {
    /// The kind requested by `flags`; [`TunFlags::TUN`] wins if both kinds are set.
    ///
    /// # Errors
    ///
    /// Returns [`TunError::InvalidArgument`] if neither [`TunFlags::TUN`] nor [`TunFlags::TAP`]
    /// is set.
    pub fn from_flags(flags: TunFlags) -> Result<DeviceKind, TunError> {
        if flags.contains(TunFlags::TUN) {
            Ok(DeviceKind::Tun)
        } else if flags.contains(TunFlags::TAP) {
            Ok(DeviceKind::Tap)
        } else {
            Err(TunError::InvalidArgument("device type missing"))
        }
    }

    /// The flag identifying this kind.
    #[must_use]
    pub fn flag(self) -> TunFlags {
        match self {
            DeviceKind::Tun => TunFlags::TUN,
            DeviceKind::Tap => TunFlags::TAP,
        }
    }

    /// Name template used when a bind request names no device.
    #[must_use]
    pub fn default_template(self) -> &'static str {
        match self {
            DeviceKind::Tun => "tun%d",
            DeviceKind::Tap => "tap%d",
        }
    }
}

/// A bind request: which device, and how.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct DeviceConfig {
    /// Device name, a `%d` template, or empty for the default template of the kind.
    #[builder(default)]
    pub name: String,
    /// Requested flags; must carry [`TunFlags::TUN`] or [`TunFlags::TAP`].
    pub flags: TunFlags,
}

impl DeviceConfig {
    /// The device kind requested.
    ///
    /// # Errors
    ///
    /// See [`DeviceKind::from_flags`].
    pub fn kind(&self) -> Result<DeviceKind, TunError> {
        DeviceKind::from_flags(self.flags)
    }
}

/// Send buffer size meaning "no limit".
pub const SNDBUF_UNLIMITED: usize = 0x7fff_ffff;

/// Default length of each handle's outbound ring.
pub const DEFAULT_TX_QUEUE_LEN: usize = 500;

/// Driver wide settings.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct DriverConfig {
    /// How long an idle flow keeps its queue affinity.
    pub ageing: Duration,
    /// Ring length given to new devices.
    pub tx_queue_len: usize,
    /// Send buffer given to new handles.
    pub sndbuf: usize,
    /// Run a background thread per device to expire flows.  Without it the owner drives
    /// expiry through [`flow_entry::FlowCache::run_expired_timer`].
    pub flow_gc: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            ageing: flow_entry::flow_table::DEFAULT_AGEING,
            tx_queue_len: DEFAULT_TX_QUEUE_LEN,
            sndbuf: SNDBUF_UNLIMITED,
            flow_gc: true,
        }
    }
}

static_assertions::const_assert_eq!(TunFlags::TUN.bits(), 0x0001);
static_assertions::const_assert_eq!(TunFlags::MULTI_QUEUE.bits(), 0x0100);
static_assertions::const_assert_eq!(TunFlags::NOFILTER.bits(), 0x1000);
static_assertions::const_assert_eq!(TunFlags::TUN_EXCL.bits(), 0x8000);
static_assertions::const_assert_eq!(OffloadFlags::USO6.bits(), 0x40);
static_assertions::const_assert_eq!(PollFlags::WRNORM.bits(), 0x0100);

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn csum_gates_everything() {
        assert_eq!(
            NetdevFeatures::from_offload(OffloadFlags::empty()),
            Ok(NetdevFeatures::empty())
        );
        assert!(NetdevFeatures::from_offload(OffloadFlags::TSO4).is_err());
        assert_eq!(
            NetdevFeatures::from_offload(OffloadFlags::CSUM | OffloadFlags::TSO4),
            Ok(NetdevFeatures::HW_CSUM | NetdevFeatures::TSO)
        );
    }

    #[test]
    fn ecn_needs_tso() {
        assert!(NetdevFeatures::from_offload(OffloadFlags::CSUM | OffloadFlags::TSO_ECN).is_err());
        assert_eq!(
            NetdevFeatures::from_offload(
                OffloadFlags::CSUM | OffloadFlags::TSO6 | OffloadFlags::TSO_ECN
            ),
            Ok(NetdevFeatures::HW_CSUM | NetdevFeatures::TSO6 | NetdevFeatures::TSO_ECN)
        );
    }

    #[test]
    fn uso_needs_both_families() {
        assert!(NetdevFeatures::from_offload(OffloadFlags::CSUM | OffloadFlags::USO4).is_err());
        assert_eq!(
            NetdevFeatures::from_offload(
                OffloadFlags::CSUM | OffloadFlags::USO4 | OffloadFlags::USO6 | OffloadFlags::UFO
            ),
            Ok(NetdevFeatures::HW_CSUM | NetdevFeatures::GSO_UDP_L4)
        );
    }

    #[test]
    fn unknown_bits_are_rejected() {
        let unknown = OffloadFlags::from_bits_retain(0x100) | OffloadFlags::CSUM;
        assert_eq!(
            NetdevFeatures::from_offload(unknown),
            Err(TunError::InvalidArgument("unsupported offload flags"))
        );
    }

    #[test]
    fn kind_from_flags() {
        assert_eq!(DeviceKind::from_flags(TunFlags::TUN), Ok(DeviceKind::Tun));
        assert_eq!(
            DeviceKind::from_flags(TunFlags::TAP | TunFlags::NO_PI),
            Ok(DeviceKind::Tap)
        );
        assert!(DeviceKind::from_flags(TunFlags::NO_PI).is_err());
        assert_eq!(
            DeviceKind::from_flags(TunFlags::TUN | TunFlags::TAP),
            Ok(DeviceKind::Tun)
        );
    }

    #[test]
    fn device_config_builder() {
        let config = DeviceConfigBuilder::default()
            .flags(TunFlags::TAP | TunFlags::MULTI_QUEUE)
            .build()
            .unwrap();
        assert_eq!(config.name, "");
        assert_eq!(config.kind(), Ok(DeviceKind::Tap));
    }

    #[test]
    fn driver_config_serde() {
        let config = DriverConfigBuilder::default()
            .tx_queue_len(64usize)
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: DriverConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        let partial: DriverConfig = serde_json::from_str(r#"{"flow_gc": false}"#).unwrap();
        assert_eq!(partial.tx_queue_len, DEFAULT_TX_QUEUE_LEN);
        assert!(!partial.flow_gc);
    }
}
