// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Control requests made through a bound handle.
//!
//! Each request takes the registration lock and applies to the device the handle is bound to
//! (attached or detached); an unbound handle gets [`TunError::NotBound`].

use crate::config::{DeviceKind, NetdevFeatures, OffloadFlags, TunFlags};
use crate::device::Device;
use crate::error::TunError;
use crate::handle::Handle;
use crate::prog::FilterProgram;
use crate::registry::{Driver, Registry};
use net::eth::mac::Mac;
use parking_lot::MutexGuard;
use std::sync::Arc;
use tracing::{debug, info};

impl Driver {
    fn bound(&self, handle: &Handle) -> Result<(MutexGuard<'_, Registry>, Arc<Device>), TunError> {
        let reg = self.lock_registry();
        let device = handle.device().ok_or(TunError::NotBound)?;
        Ok((reg, device))
    }

    fn bound_tap(
        &self,
        handle: &Handle,
    ) -> Result<(MutexGuard<'_, Registry>, Arc<Device>), TunError> {
        let (reg, device) = self.bound(handle)?;
        if device.kind() != DeviceKind::Tap {
            return Err(TunError::InvalidArgument("only tap devices filter"));
        }
        Ok((reg, device))
    }

    /// Restrict the device to user `owner` (or lift the restriction).
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`] if the handle is not bound.
    pub fn set_owner(&self, handle: &Handle, owner: Option<u32>) -> Result<(), TunError> {
        let (_reg, device) = self.bound(handle)?;
        device.set_owner(owner);
        info!(device = %device.name(), ?owner, "owner set");
        Ok(())
    }

    /// Restrict the device to members of `group` (or lift the restriction).
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`] if the handle is not bound.
    pub fn set_group(&self, handle: &Handle, group: Option<u32>) -> Result<(), TunError> {
        let (_reg, device) = self.bound(handle)?;
        device.set_group(group);
        info!(device = %device.name(), ?group, "group set");
        Ok(())
    }

    /// Keep the device after its last handle closes.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`] if the handle is not bound.
    pub fn set_persistent(&self, handle: &Handle, persistent: bool) -> Result<(), TunError> {
        let (_reg, device) = self.bound(handle)?;
        if persistent {
            device.insert_flags(TunFlags::PERSIST);
        } else {
            device.remove_flags(TunFlags::PERSIST);
        }
        info!(device = %device.name(), persistent, "persistence changed");
        Ok(())
    }

    /// Announce which offloads user space handles.  Returns the resulting device features.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`] if the handle is not bound, [`TunError::InvalidArgument`] for
    /// unknown offload bits.
    pub fn set_offload_features(
        &self,
        handle: &Handle,
        offload: OffloadFlags,
    ) -> Result<NetdevFeatures, TunError> {
        let (_reg, device) = self.bound(handle)?;
        let features = device.set_offload(offload)?;
        debug!(device = %device.name(), ?offload, ?features, "offloads changed");
        Ok(features)
    }

    /// Set the send buffer of the device and of every active queue.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`] if the handle is not bound, [`TunError::InvalidArgument`] for a
    /// zero size.
    pub fn set_sndbuf(&self, handle: &Handle, sndbuf: usize) -> Result<(), TunError> {
        let (reg, device) = self.bound(handle)?;
        device.set_sndbuf(&reg, sndbuf)
    }

    /// Size of the offload header exchanged with user space.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`] if the handle is not bound.
    pub fn vnet_hdr_size(&self, handle: &Handle) -> Result<usize, TunError> {
        let (_reg, device) = self.bound(handle)?;
        Ok(device.vnet_hdr_sz())
    }

    /// Change the size of the offload header; bytes past the basic header are padding.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`] if the handle is not bound, [`TunError::InvalidArgument`] if
    /// `size` is smaller than the basic header.
    pub fn set_vnet_hdr_size(&self, handle: &Handle, size: usize) -> Result<(), TunError> {
        let (_reg, device) = self.bound(handle)?;
        device.set_vnet_hdr_sz(size)
    }

    /// Force little endian offload headers.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`] if the handle is not bound.
    pub fn set_vnet_le(&self, handle: &Handle, little: bool) -> Result<(), TunError> {
        self.toggle(handle, TunFlags::VNET_LE, little)
    }

    /// Force big endian offload headers.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`] if the handle is not bound.
    pub fn set_vnet_be(&self, handle: &Handle, big: bool) -> Result<(), TunError> {
        self.toggle(handle, TunFlags::VNET_BE, big)
    }

    fn toggle(&self, handle: &Handle, flag: TunFlags, on: bool) -> Result<(), TunError> {
        let (_reg, device) = self.bound(handle)?;
        if on {
            device.insert_flags(flag);
        } else {
            device.remove_flags(flag);
        }
        Ok(())
    }

    /// Store `program` and attach it to every active queue.  Queues attached later get it
    /// too.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`], [`TunError::InvalidArgument`] for tun devices, and
    /// [`TunError::FilterAttachFailed`] if a queue refused the program (no queue keeps it
    /// then).
    pub fn set_filter_program(
        &self,
        handle: &Handle,
        program: FilterProgram,
    ) -> Result<(), TunError> {
        let (reg, device) = self.bound_tap(handle)?;
        device.attach_socket_filter(&reg, program)
    }

    /// Detach the stored socket filter from every queue.  The program stays stored.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`], [`TunError::InvalidArgument`] for tun devices.
    pub fn detach_filter_program(&self, handle: &Handle) -> Result<(), TunError> {
        let (reg, device) = self.bound_tap(handle)?;
        device.detach_socket_filter(&reg);
        Ok(())
    }

    /// The stored socket filter program.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`], [`TunError::InvalidArgument`] for tun devices.
    pub fn filter_program(&self, handle: &Handle) -> Result<Option<FilterProgram>, TunError> {
        let (_reg, device) = self.bound_tap(handle)?;
        Ok(device.filter_program())
    }

    /// Replace the destination filter of the device.  Returns the number of addresses matched
    /// exactly; zero also when the list could not be expressed and the filter was left off.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`], [`TunError::InvalidArgument`] for tun devices.
    pub fn set_tx_filter(
        &self,
        handle: &Handle,
        addrs: &[Mac],
        all_multi: bool,
    ) -> Result<usize, TunError> {
        let (_reg, device) = self.bound_tap(handle)?;
        match device.filter().update(addrs, all_multi) {
            Ok(exact) => Ok(exact),
            Err(TunError::NotApplicable) => {
                debug!(device = %device.name(), "filter left disabled");
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    /// Hardware address of the device.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`] if the handle is not bound.
    pub fn hwaddr(&self, handle: &Handle) -> Result<Mac, TunError> {
        let (_reg, device) = self.bound(handle)?;
        Ok(device.hwaddr())
    }

    /// Change the hardware address of a tap device.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`], [`TunError::NotApplicable`] for tun devices and
    /// [`TunError::InvalidArgument`] for addresses no frame may come from.
    pub fn set_hwaddr(&self, handle: &Handle, mac: Mac) -> Result<(), TunError> {
        let (_reg, device) = self.bound(handle)?;
        device.set_hwaddr(mac)?;
        info!(device = %device.name(), %mac, "hardware address changed");
        Ok(())
    }

    /// Turn the carrier of the device on or off.
    ///
    /// # Errors
    ///
    /// [`TunError::NotBound`] if the handle is not bound.
    pub fn set_carrier(&self, handle: &Handle, carrier: bool) -> Result<(), TunError> {
        let (_reg, device) = self.bound(handle)?;
        device.set_carrier(carrier);
        Ok(())
    }
}
