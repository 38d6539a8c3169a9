// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Queue slot table and queue attach / detach.
//!
//! Slots `0..active` each hold a handle whose `queue_index` is its slot.  Detaching swaps the
//! last active handle into the hole.  Detached (disabled) handles keep their binding but hold
//! no slot.  Mutation happens with the registration lock held; the packet path reads slots
//! inside a read-side section and treats an empty slot as a reason to drop.

use crate::config::TunFlags;
use crate::device::Device;
use crate::error::TunError;
use crate::handle::Handle;
use crate::registry::Registry;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tracing::{debug, warn};

/// Number of queue slots per device.
pub const N_MAX: usize = 256;

/// The slots of one device.
#[derive(Debug)]
pub struct QueueTable {
    slots: Box<[ArcSwapOption<Handle>]>,
    active: AtomicU16,
    disabled: Mutex<Vec<Arc<Handle>>>,
}

impl Default for QueueTable {
    fn default() -> Self {
        QueueTable {
            slots: (0..N_MAX).map(|_| ArcSwapOption::empty()).collect(),
            active: AtomicU16::new(0),
            disabled: Mutex::new(Vec::new()),
        }
    }
}

impl QueueTable {
    /// Number of attached queues.
    #[must_use]
    pub fn active(&self) -> u16 {
        self.active.load(Ordering::Acquire)
    }

    /// Number of detached queues.
    #[must_use]
    pub fn disabled(&self) -> usize {
        self.disabled.lock().len()
    }

    /// The handle in slot `index`, if the slot is active and populated.
    #[must_use]
    pub fn get(&self, index: u16) -> Option<Arc<Handle>> {
        if index >= self.active() {
            return None;
        }
        self.slots.get(usize::from(index))?.load_full()
    }

    /// The handles of every active slot, in slot order.
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<Handle>> {
        (0..self.active()).filter_map(|i| self.get(i)).collect()
    }

    /// Handles in the disabled pool.
    #[must_use]
    pub fn disabled_handles(&self) -> Vec<Arc<Handle>> {
        self.disabled.lock().clone()
    }

    fn slot(&self, index: u16) -> &ArcSwapOption<Handle> {
        &self.slots[usize::from(index)]
    }

    fn push(&self, _: &Registry, handle: &Arc<Handle>) -> u16 {
        let index = self.active();
        handle.set_queue_index(index);
        self.slot(index).store(Some(handle.clone()));
        self.active.store(index + 1, Ordering::Release);
        index
    }

    fn swap_remove(&self, _: &Registry, index: u16) {
        let last = self.active() - 1;
        let moved = self.slot(last).load_full();
        if let Some(moved) = &moved {
            moved.set_queue_index(index);
        }
        self.slot(index).store(moved);
        self.slot(last).store(None);
        self.active.store(last, Ordering::Release);
    }

    fn disable(&self, _: &Registry, handle: &Arc<Handle>) {
        self.disabled.lock().push(handle.clone());
    }

    fn enable(&self, _: &Registry, handle: &Handle) {
        self.disabled
            .lock()
            .retain(|h| !std::ptr::eq(Arc::as_ptr(h), handle));
    }
}

impl Device {
    /// Give `handle` the next free slot.
    ///
    /// With `publish` unset the handle's back-reference is left for the caller to set.
    #[tracing::instrument(level = "debug", skip_all, fields(device = %self.name(), handle = handle.id()))]
    pub(crate) fn attach(
        self: &Arc<Self>,
        reg: &Registry,
        handle: &Arc<Handle>,
        skip_filter: bool,
        publish: bool,
    ) -> Result<(), TunError> {
        if !self
            .gate()
            .may_attach_queue(handle.credentials(), self.name())
        {
            return Err(TunError::PermissionDenied);
        }
        let detached_from = handle.detached.load_full();
        if handle.tun.load().is_some() && detached_from.is_none() {
            return Err(TunError::AlreadyBound);
        }
        if let Some(from) = &detached_from {
            if !Arc::ptr_eq(from, self) {
                return Err(TunError::InvalidArgument("queue detached from another device"));
            }
        }
        let active = self.queues.active();
        if !self.flags().contains(TunFlags::MULTI_QUEUE) && active == 1 {
            return Err(TunError::SingleQueueBusy);
        }
        if detached_from.is_none() && usize::from(active) + self.queues.disabled() >= N_MAX {
            return Err(TunError::QueueLimitReached);
        }
        if !skip_filter {
            if let Some(program) = self.attached_filter_program() {
                let filter = self
                    .loader()
                    .load(&program)
                    .map_err(|err| TunError::FilterAttachFailed(err.to_string()))?;
                handle.set_socket_filter(Some(filter));
            }
        }
        if detached_from.is_none() {
            handle.resize_ring(self.tx_queue_len())?;
        }
        handle.clear_shutdown();
        if detached_from.is_some() {
            self.queues.enable(reg, handle);
            handle.detached.store(None);
        }
        if publish {
            handle.tun.store(Some(self.clone()));
        }
        let index = self.queues.push(reg, handle);
        debug!(index, "queue attached");
        self.publish_queue_count();
        Ok(())
    }

    /// Release the slot of `handle`.
    ///
    /// A clean detach unbinds the handle for good (it is closing); otherwise it moves to the
    /// disabled pool.  Detaching a detached handle without `clean` does nothing.  Returns true
    /// if the device is left with no queue at all and should be unregistered.
    #[tracing::instrument(level = "debug", skip_all, fields(device = %self.name(), handle = handle.id(), clean = clean))]
    pub(crate) fn detach(self: &Arc<Self>, reg: &Registry, handle: &Arc<Handle>, clean: bool) -> bool {
        let detached = handle.is_detached();
        let attached = !detached
            && handle
                .tun
                .load()
                .as_ref()
                .is_some_and(|device| Arc::ptr_eq(device, self));
        if attached {
            let index = handle.queue_index();
            if index >= self.queues.active() {
                warn!(index, "attached handle outside the active slots");
                return false;
            }
            self.queues.swap_remove(reg, index);
            if clean {
                handle.tun.store(None);
            } else {
                self.queues.disable(reg, handle);
                handle.detached.store(Some(self.clone()));
            }
            self.sync.synchronize();
            // one past the vacated last slot
            self.flows().flush_by_queue(self.queues.active() + 1);
            handle.purge();
            self.publish_queue_count();
            debug!(index, "queue detached");
        } else if detached && clean {
            self.queues.enable(reg, handle);
            handle.detached.store(None);
        }
        if !clean {
            return false;
        }
        handle.tun.store(None);
        handle.purge();
        let empty = self.queues.active() == 0 && self.queues.disabled() == 0;
        if empty {
            self.set_carrier(false);
        }
        empty && !self.flags().contains(TunFlags::PERSIST) && self.is_registered()
    }

    /// Unbind every handle, attached or detached, and shut their readers down.
    #[tracing::instrument(level = "debug", skip_all, fields(device = %self.name()))]
    pub(crate) fn detach_all(&self, reg: &Registry) {
        let mut active = Vec::new();
        while self.queues.active() > 0 {
            let last = self.queues.active() - 1;
            if let Some(handle) = self.queues.slot(last).load_full() {
                active.push(handle);
            }
            self.queues.swap_remove(reg, last);
        }
        let disabled = std::mem::take(&mut *self.queues.disabled.lock());
        for handle in active.iter().chain(&disabled) {
            handle.shutdown();
            handle.tun.store(None);
            handle.detached.store(None);
        }
        self.sync.synchronize();
        for handle in active.iter().chain(&disabled) {
            handle.purge();
        }
        debug_assert_eq!(self.queues.active(), 0);
        debug_assert_eq!(self.queues.disabled(), 0);
        debug!(
            active = active.len(),
            disabled = disabled.len(),
            "detached every queue"
        );
    }

    fn publish_queue_count(&self) {
        self.stack()
            .set_real_num_queues(self.name(), self.queues.active());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{DeviceConfigBuilder, DriverConfig, TunFlags};
    use crate::registry::Driver;
    use crate::stack::{Credentials, RecordingStack};
    use flow_entry::ManualClock;

    fn driver() -> Driver {
        let config = DriverConfig {
            flow_gc: false,
            ..DriverConfig::default()
        };
        Driver::new(config, Arc::new(RecordingStack::new())).with_clock(Arc::new(ManualClock::new()))
    }

    fn multiqueue(driver: &Driver, n: usize) -> (Arc<Device>, Vec<Arc<Handle>>) {
        let config = DeviceConfigBuilder::default()
            .name("mq0")
            .flags(TunFlags::TUN | TunFlags::NO_PI | TunFlags::MULTI_QUEUE)
            .build()
            .unwrap();
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let handle = driver.open(Credentials::admin());
                driver.create_or_bind(&handle, &config).unwrap();
                handle
            })
            .collect();
        (driver.device("mq0").unwrap(), handles)
    }

    fn assert_slots(device: &Device) {
        let handles = device.queues().handles();
        assert_eq!(handles.len(), usize::from(device.queues().active()));
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(usize::from(handle.queue_index()), i);
            assert!(!handle.is_detached());
        }
        for (i, a) in handles.iter().enumerate() {
            for b in &handles[i + 1..] {
                assert!(!Arc::ptr_eq(a, b));
            }
        }
    }

    #[test]
    fn swap_remove_reindexes() {
        let driver = driver();
        let (device, handles) = multiqueue(&driver, 4);
        assert_slots(&device);
        driver.set_queue(&handles[1], TunFlags::DETACH_QUEUE).unwrap();
        assert_eq!(device.queues().active(), 3);
        assert_eq!(device.queues().disabled(), 1);
        assert_eq!(handles[3].queue_index(), 1);
        assert_slots(&device);
        driver.set_queue(&handles[1], TunFlags::ATTACH_QUEUE).unwrap();
        assert_eq!(handles[1].queue_index(), 3);
        assert_eq!(device.queues().disabled(), 0);
        assert_slots(&device);
    }

    #[test]
    fn detach_purges_flows_of_moved_queue() {
        let driver = driver();
        let (device, handles) = multiqueue(&driver, 3);
        device.flows().update(0x10, 0);
        device.flows().update(0x20, 2);
        device.flows().update(0x30, 3);
        driver.set_queue(&handles[0], TunFlags::DETACH_QUEUE).unwrap();
        // two queues left: entries for queue 3 go, the rest stay
        assert_eq!(device.flows().lookup(0x10), Some(0));
        assert_eq!(device.flows().lookup(0x20), Some(2));
        assert_eq!(device.flows().lookup(0x30), None);
    }

    #[test]
    fn detach_of_detached_is_a_no_op() {
        let driver = driver();
        let (device, handles) = multiqueue(&driver, 2);
        driver.set_queue(&handles[0], TunFlags::DETACH_QUEUE).unwrap();
        let reg = driver.lock_registry();
        assert!(!device.detach(&reg, &handles[0], false));
        drop(reg);
        assert_eq!(device.queues().active(), 1);
        assert_eq!(device.queues().disabled(), 1);
        assert!(handles[0].is_detached());
        assert_slots(&device);
    }

    #[test]
    fn attach_of_attached_is_refused() {
        let driver = driver();
        let (device, handles) = multiqueue(&driver, 1);
        let reg = driver.lock_registry();
        assert_eq!(
            device.attach(&reg, &handles[0], false, true),
            Err(TunError::AlreadyBound)
        );
    }

    #[test]
    fn detach_all_shuts_everyone_down() {
        let driver = driver();
        let (device, handles) = multiqueue(&driver, 3);
        driver.set_queue(&handles[2], TunFlags::DETACH_QUEUE).unwrap();
        let reg = driver.lock_registry();
        device.detach_all(&reg);
        drop(reg);
        assert_eq!(device.queues().active(), 0);
        assert_eq!(device.queues().disabled(), 0);
        for handle in &handles {
            assert!(handle.device().is_none());
            assert!(!handle.is_detached());
        }
    }
}
