// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The driver: the set of devices and the lifecycle of handles bound to them.
//!
//! Every structural change (create, bind, attach, detach, teardown and the control requests
//! in [`crate::control`]) runs with the registration lock held.  Packet paths never take it.

use crate::config::{DeviceConfig, DriverConfig, TunFlags};
use crate::device::{Collaborators, Device};
use crate::error::TunError;
use crate::handle::Handle;
use crate::prog::{AcceptAllLoader, FilterLoader};
use crate::stack::{AccessGate, Credentials, NetStack, OpenGate};
use flow_entry::{Clock, MonotonicClock};
use net::interface::{InterfaceName, NameRequest};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Highest index tried when instantiating a name template.
const MAX_TEMPLATE_INDEX: usize = 32_768;

/// Registered devices.  Holding `&Registry` proves the registration lock is held.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    devices: BTreeMap<InterfaceName, Arc<Device>>,
}

impl Registry {
    fn get(&self, name: &InterfaceName) -> Option<&Arc<Device>> {
        self.devices.get(name)
    }

    /// Instantiate `request` with the lowest index not naming a device.
    fn free_name(&self, request: &NameRequest) -> Result<InterfaceName, TunError> {
        match request {
            NameRequest::Exact(name) => Ok(name.clone()),
            NameRequest::Template(_) => {
                for index in 0..MAX_TEMPLATE_INDEX {
                    let name = request.instantiate(index)?;
                    if !self.devices.contains_key(&name) {
                        return Ok(name);
                    }
                }
                Err(TunError::Busy)
            }
        }
    }

    /// Tear `device` down and forget it.
    pub(crate) fn unregister(&mut self, device: &Arc<Device>) {
        device.unregister(self);
        self.devices.remove(device.name());
    }
}

/// The virtual interface driver.
#[derive(Debug)]
pub struct Driver {
    config: DriverConfig,
    registry: Mutex<Registry>,
    stack: Arc<dyn NetStack>,
    gate: Arc<dyn AccessGate>,
    loader: Arc<dyn FilterLoader>,
    clock: Arc<dyn Clock>,
}

impl Driver {
    /// A driver handing packets to `stack`.  Every access is allowed, every socket filter
    /// program accepts everything, and flows age on the monotonic clock.
    #[must_use]
    pub fn new(config: DriverConfig, stack: Arc<dyn NetStack>) -> Driver {
        Driver {
            config,
            registry: Mutex::new(Registry::default()),
            stack,
            gate: Arc::new(OpenGate),
            loader: Arc::new(AcceptAllLoader),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Consult `gate` on creation, open and queue attach.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn AccessGate>) -> Driver {
        self.gate = gate;
        self
    }

    /// Load socket filter programs with `loader`.
    #[must_use]
    pub fn with_filter_loader(mut self, loader: Arc<dyn FilterLoader>) -> Driver {
        self.loader = loader;
        self
    }

    /// Age flows on `clock`.  Only devices created afterwards use it.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Driver {
        self.clock = clock;
        self
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Flags a caller may request.
    #[must_use]
    pub fn features(&self) -> TunFlags {
        TunFlags::SUPPORTED
    }

    pub(crate) fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock()
    }

    /// Open a new, unbound handle.
    #[must_use]
    pub fn open(&self, creds: Credentials) -> Arc<Handle> {
        let handle = Arc::new(Handle::new(creds, self.config.sndbuf));
        debug!(handle = handle.id(), "handle opened");
        handle
    }

    /// Look a device up by name.
    #[must_use]
    pub fn device(&self, name: &str) -> Option<Arc<Device>> {
        let name = InterfaceName::try_from(name).ok()?;
        self.registry.lock().get(&name).cloned()
    }

    /// Every registered device, by name.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.registry.lock().devices.values().cloned().collect()
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            stack: self.stack.clone(),
            gate: self.gate.clone(),
            loader: self.loader.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Bind `handle` to the device named by `config`, creating the device if it does not
    /// exist.  Returns the name of the device.
    ///
    /// # Errors
    ///
    /// - [`TunError::AlreadyBound`] if the handle is bound already.
    /// - [`TunError::InvalidName`] if the name is not a legal name or template.
    /// - [`TunError::Busy`] if the device exists and [`TunFlags::TUN_EXCL`] was requested.
    /// - [`TunError::InvalidArgument`] if the device exists with a different kind or
    ///   multi-queue setting, or if the flags name neither kind.  Flags naming both kinds
    ///   request a tun device.
    /// - [`TunError::PermissionDenied`] if the caller may not create or use the device.
    /// - Any error of queue attach or of the stack's device registration.
    #[tracing::instrument(level = "info", skip_all, fields(handle = handle.id(), name = %config.name))]
    pub fn create_or_bind(
        &self,
        handle: &Arc<Handle>,
        config: &DeviceConfig,
    ) -> Result<InterfaceName, TunError> {
        let mut reg = self.registry.lock();
        if handle.device().is_some() {
            return Err(TunError::AlreadyBound);
        }
        let kind = config.kind()?;
        let requested = config.flags;
        let request = if config.name.is_empty() {
            NameRequest::parse(kind.default_template())?
        } else {
            NameRequest::parse(&config.name)?
        };
        let creds = handle.credentials();

        let existing = match &request {
            NameRequest::Exact(name) => reg.get(name).cloned(),
            NameRequest::Template(_) => None,
        };
        let device = if let Some(device) = existing {
            if requested.contains(TunFlags::TUN_EXCL) {
                return Err(TunError::Busy);
            }
            if device.kind() != kind {
                return Err(TunError::InvalidArgument("device exists with another type"));
            }
            if requested.contains(TunFlags::MULTI_QUEUE)
                != device.flags().contains(TunFlags::MULTI_QUEUE)
            {
                return Err(TunError::InvalidArgument(
                    "device exists with another queue mode",
                ));
            }
            if device.not_capable(creds) || !self.gate.may_open_device(creds, device.name()) {
                return Err(TunError::PermissionDenied);
            }
            device.attach(&reg, handle, requested.contains(TunFlags::NOFILTER), true)?;
            if device.flags().contains(TunFlags::MULTI_QUEUE)
                && usize::from(device.queues().active()) + device.queues().disabled() > 1
            {
                self.stack.state_change(device.name());
                return Ok(device.name().clone());
            }
            device.set_feature_flags(requested);
            self.stack.state_change(device.name());
            device
        } else {
            if !creds.net_admin || !self.gate.may_create_device(creds) {
                return Err(TunError::PermissionDenied);
            }
            let name = reg.free_name(&request)?;
            let device = Arc::new(Device::new(
                name,
                kind,
                requested,
                &self.config,
                self.collaborators(),
            ));
            device.attach(&reg, handle, false, false)?;
            if let Err(err) = self.stack.register_device(device.name(), kind) {
                device.detach_all(&reg);
                return Err(err);
            }
            device.set_registered(true);
            handle.tun.store(Some(device.clone()));
            reg.devices.insert(device.name().clone(), device.clone());
            if self.config.flow_gc {
                device.start_gc();
            }
            info!(device = %device.name(), ?kind, "device created");
            device
        };
        device.set_carrier(!requested.contains(TunFlags::NO_CARRIER));
        Ok(device.name().clone())
    }

    /// Park an attached queue in the disabled pool ([`TunFlags::DETACH_QUEUE`]) or bring a
    /// parked queue back ([`TunFlags::ATTACH_QUEUE`]).
    ///
    /// # Errors
    ///
    /// [`TunError::InvalidArgument`] if the handle is not in the right state for the request,
    /// the device is not multi-queue, or `flags` asks for neither; otherwise any error of
    /// queue attach.
    #[tracing::instrument(level = "debug", skip(self, handle), fields(handle = handle.id()))]
    pub fn set_queue(&self, handle: &Arc<Handle>, flags: TunFlags) -> Result<(), TunError> {
        let reg = self.registry.lock();
        let device = if flags.contains(TunFlags::ATTACH_QUEUE) {
            let device = handle
                .detached
                .load_full()
                .ok_or(TunError::InvalidArgument("queue is not detached"))?;
            device.attach(&reg, handle, false, true)?;
            device
        } else if flags.contains(TunFlags::DETACH_QUEUE) {
            let device = handle
                .device()
                .filter(|device| {
                    device.flags().contains(TunFlags::MULTI_QUEUE) && !handle.is_detached()
                })
                .ok_or(TunError::InvalidArgument("queue cannot be detached"))?;
            device.detach(&reg, handle, false);
            device
        } else {
            return Err(TunError::InvalidArgument("neither attach nor detach requested"));
        };
        self.stack.state_change(device.name());
        Ok(())
    }

    /// Release `handle`.  The last handle of a device which is not persistent takes the
    /// device with it.
    #[tracing::instrument(level = "debug", skip_all, fields(handle = handle.id()))]
    pub fn close(&self, handle: &Arc<Handle>) {
        let mut reg = self.registry.lock();
        let Some(device) = handle.device() else {
            return;
        };
        if device.detach(&reg, handle, true) {
            reg.unregister(&device);
        }
    }

    /// Remove a device whatever its handles or persistence; its handles become unbound.
    ///
    /// # Errors
    ///
    /// [`TunError::InvalidArgument`] if no such device exists.
    pub fn destroy_device(&self, name: &str) -> Result<(), TunError> {
        let name = InterfaceName::try_from(name)?;
        let mut reg = self.registry.lock();
        let device = reg
            .get(&name)
            .cloned()
            .ok_or(TunError::InvalidArgument("no such device"))?;
        reg.unregister(&device);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{DeviceConfigBuilder, DeviceKind};
    use crate::stack::{RecordingStack, StackEvent};
    use flow_entry::ManualClock;
    use pretty_assertions::assert_eq;

    fn driver() -> (Driver, Arc<RecordingStack>) {
        let stack = Arc::new(RecordingStack::new());
        let config = DriverConfig {
            flow_gc: false,
            ..DriverConfig::default()
        };
        let driver = Driver::new(config, stack.clone()).with_clock(Arc::new(ManualClock::new()));
        (driver, stack)
    }

    fn config(name: &str, flags: TunFlags) -> DeviceConfig {
        DeviceConfigBuilder::default()
            .name(name)
            .flags(flags)
            .build()
            .unwrap()
    }

    #[test]
    fn template_takes_lowest_free_index() {
        let (driver, _) = driver();
        let a = driver.open(Credentials::admin());
        let b = driver.open(Credentials::admin());
        let c = driver.open(Credentials::admin());
        let tun = TunFlags::TUN | TunFlags::NO_PI;
        assert_eq!(driver.create_or_bind(&a, &config("", tun)).unwrap().as_str(), "tun0");
        assert_eq!(driver.create_or_bind(&b, &config("", tun)).unwrap().as_str(), "tun1");
        driver.close(&a);
        assert!(driver.device("tun0").is_none());
        assert_eq!(driver.create_or_bind(&c, &config("tun%d", tun)).unwrap().as_str(), "tun0");
    }

    #[test]
    fn created_device_is_registered_and_bound() {
        let (driver, stack) = driver();
        let handle = driver.open(Credentials::admin());
        driver
            .create_or_bind(&handle, &config("tap7", TunFlags::TAP | TunFlags::VNET_HDR))
            .unwrap();
        let device = driver.device("tap7").unwrap();
        assert!(device.is_registered());
        assert!(device.carrier());
        assert!(device.flags().contains(TunFlags::TAP | TunFlags::VNET_HDR));
        assert!(device.hwaddr().is_local());
        assert_eq!(handle.queue_index(), 0);
        assert!(Arc::ptr_eq(&handle.device().unwrap(), &device));
        assert!(stack.events().iter().any(|event| matches!(
            event,
            StackEvent::Registered(name, DeviceKind::Tap) if name.as_str() == "tap7"
        )));
    }

    #[test]
    fn rebinding_a_bound_handle_is_refused() {
        let (driver, _) = driver();
        let handle = driver.open(Credentials::admin());
        let tun = config("tun0", TunFlags::TUN);
        driver.create_or_bind(&handle, &tun).unwrap();
        assert_eq!(driver.create_or_bind(&handle, &tun), Err(TunError::AlreadyBound));
    }

    #[test]
    fn bind_rules_for_existing_devices() {
        let (driver, _) = driver();
        let first = driver.open(Credentials::admin());
        driver
            .create_or_bind(&first, &config("mq0", TunFlags::TAP | TunFlags::MULTI_QUEUE))
            .unwrap();
        let other = driver.open(Credentials::admin());
        assert_eq!(
            driver.create_or_bind(&other, &config("mq0", TunFlags::TUN | TunFlags::MULTI_QUEUE)),
            Err(TunError::InvalidArgument("device exists with another type"))
        );
        assert_eq!(
            driver.create_or_bind(&other, &config("mq0", TunFlags::TAP)),
            Err(TunError::InvalidArgument("device exists with another queue mode"))
        );
        assert_eq!(
            driver.create_or_bind(
                &other,
                &config("mq0", TunFlags::TAP | TunFlags::MULTI_QUEUE | TunFlags::TUN_EXCL)
            ),
            Err(TunError::Busy)
        );
        driver
            .create_or_bind(&other, &config("mq0", TunFlags::TAP | TunFlags::MULTI_QUEUE))
            .unwrap();
        assert_eq!(other.queue_index(), 1);
    }

    #[test]
    fn single_queue_device_takes_one_handle() {
        let (driver, _) = driver();
        let first = driver.open(Credentials::admin());
        let tun = config("tun0", TunFlags::TUN);
        driver.create_or_bind(&first, &tun).unwrap();
        let second = driver.open(Credentials::admin());
        assert_eq!(driver.create_or_bind(&second, &tun), Err(TunError::SingleQueueBusy));
    }

    #[test]
    fn creation_needs_net_admin() {
        let (driver, _) = driver();
        let handle = driver.open(Credentials::user(1000, 1000));
        assert_eq!(
            driver.create_or_bind(&handle, &config("tun0", TunFlags::TUN)),
            Err(TunError::PermissionDenied)
        );
        assert!(driver.devices().is_empty());
    }

    #[test]
    fn refused_registration_leaves_nothing_behind() {
        let (driver, stack) = driver();
        stack.refuse("tun0");
        let handle = driver.open(Credentials::admin());
        assert_eq!(
            driver.create_or_bind(&handle, &config("tun0", TunFlags::TUN)),
            Err(TunError::Busy)
        );
        assert!(driver.device("tun0").is_none());
        assert!(handle.device().is_none());
    }

    #[test]
    fn persistent_device_survives_last_close() {
        let (driver, stack) = driver();
        let handle = driver.open(Credentials::admin());
        driver.create_or_bind(&handle, &config("tun0", TunFlags::TUN)).unwrap();
        driver.set_persistent(&handle, true).unwrap();
        driver.close(&handle);
        let device = driver.device("tun0").unwrap();
        assert!(device.is_registered());
        assert!(!device.carrier());
        driver.destroy_device("tun0").unwrap();
        assert!(driver.device("tun0").is_none());
        assert!(!device.is_registered());
        assert!(stack.events().iter().any(|event| matches!(
            event,
            StackEvent::Unregistered(name) if name.as_str() == "tun0"
        )));
    }

    #[test]
    fn set_queue_state_checks() {
        let (driver, _) = driver();
        let single = driver.open(Credentials::admin());
        driver.create_or_bind(&single, &config("tun0", TunFlags::TUN)).unwrap();
        assert!(matches!(
            driver.set_queue(&single, TunFlags::DETACH_QUEUE),
            Err(TunError::InvalidArgument(_))
        ));
        assert!(matches!(
            driver.set_queue(&single, TunFlags::ATTACH_QUEUE),
            Err(TunError::InvalidArgument(_))
        ));
        assert!(matches!(
            driver.set_queue(&single, TunFlags::empty()),
            Err(TunError::InvalidArgument(_))
        ));
    }
}
