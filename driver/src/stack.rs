// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Collaborators: the networking stack and the access gate.

use crate::config::DeviceKind;
use crate::error::TunError;
use net::interface::InterfaceName;
use net::packet::PacketBuf;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt::Debug;

/// The networking stack devices are registered with.
pub trait NetStack: Debug + Send + Sync {
    /// A device is being created.
    ///
    /// # Errors
    ///
    /// The stack may refuse the device; the error is returned to the binder.
    fn register_device(&self, name: &InterfaceName, kind: DeviceKind) -> Result<(), TunError>;
    /// A device is gone.
    fn unregister_device(&self, name: &InterfaceName);
    /// A packet written by user space on queue `queue`.
    fn receive(&self, packet: PacketBuf, queue: u16);
    /// A packet a fast-path program asked to redirect.
    ///
    /// # Errors
    ///
    /// Returns an error if the redirect target is gone; the packet is dropped.
    fn redirect(&self, packet: PacketBuf) -> Result<(), TunError>;
    /// The number of active queues changed.
    fn set_real_num_queues(&self, name: &InterfaceName, queues: u16);
    /// Something about the device changed.
    fn state_change(&self, name: &InterfaceName);
}

/// Identity of whoever opened a handle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    /// Effective user id.
    pub uid: u32,
    /// Effective group id.
    pub gid: u32,
    /// Supplementary groups.
    pub groups: Vec<u32>,
    /// Holds network administration privilege.
    pub net_admin: bool,
}

impl Credentials {
    /// Privileged credentials.
    #[must_use]
    pub fn admin() -> Credentials {
        Credentials {
            net_admin: true,
            ..Credentials::default()
        }
    }

    /// Unprivileged credentials.
    #[must_use]
    pub fn user(uid: u32, gid: u32) -> Credentials {
        Credentials {
            uid,
            gid,
            groups: Vec::new(),
            net_admin: false,
        }
    }

    /// Returns true if `gid` is the primary or a supplementary group.
    #[must_use]
    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

/// Security hooks consulted on structural operations.
pub trait AccessGate: Debug + Send + Sync {
    /// May `creds` create a device?
    fn may_create_device(&self, creds: &Credentials) -> bool;
    /// May `creds` bind to the existing device `name`?
    fn may_open_device(&self, creds: &Credentials, name: &InterfaceName) -> bool;
    /// May `creds` attach a queue to `name`?
    fn may_attach_queue(&self, creds: &Credentials, name: &InterfaceName) -> bool;
}

/// A gate which allows everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGate;

impl AccessGate for OpenGate {
    fn may_create_device(&self, _: &Credentials) -> bool {
        true
    }

    fn may_open_device(&self, _: &Credentials, _: &InterfaceName) -> bool {
        true
    }

    fn may_attach_queue(&self, _: &Credentials, _: &InterfaceName) -> bool {
        true
    }
}

/// Something the [`RecordingStack`] saw.
#[derive(Debug, Clone)]
pub enum StackEvent {
    /// A device was registered.
    Registered(InterfaceName, DeviceKind),
    /// A device was unregistered.
    Unregistered(InterfaceName),
    /// The active queue count changed.
    RealNumQueues(InterfaceName, u16),
    /// State change notification.
    StateChange(InterfaceName),
}

/// A [`NetStack`] which keeps everything it is handed.
///
/// Useful when embedding the driver without a stack, and in tests.
#[derive(Debug, Default)]
pub struct RecordingStack {
    received: Mutex<Vec<(PacketBuf, u16)>>,
    redirected: Mutex<Vec<PacketBuf>>,
    events: Mutex<Vec<StackEvent>>,
    refused: Mutex<BTreeSet<String>>,
}

impl RecordingStack {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every packet received so far, with its queue.
    pub fn take_received(&self) -> Vec<(PacketBuf, u16)> {
        std::mem::take(&mut *self.received.lock())
    }

    /// Number of packets received and not yet taken.
    pub fn received_len(&self) -> usize {
        self.received.lock().len()
    }

    /// Take every redirected packet.
    pub fn take_redirected(&self) -> Vec<PacketBuf> {
        std::mem::take(&mut *self.redirected.lock())
    }

    /// Every event so far.
    pub fn events(&self) -> Vec<StackEvent> {
        self.events.lock().clone()
    }

    /// Make registration of `name` fail.
    pub fn refuse(&self, name: &str) {
        self.refused.lock().insert(name.to_string());
    }
}

impl NetStack for RecordingStack {
    fn register_device(&self, name: &InterfaceName, kind: DeviceKind) -> Result<(), TunError> {
        if self.refused.lock().contains(name.as_str()) {
            return Err(TunError::Busy);
        }
        self.events
            .lock()
            .push(StackEvent::Registered(name.clone(), kind));
        Ok(())
    }

    fn unregister_device(&self, name: &InterfaceName) {
        self.events
            .lock()
            .push(StackEvent::Unregistered(name.clone()));
    }

    fn receive(&self, packet: PacketBuf, queue: u16) {
        self.received.lock().push((packet, queue));
    }

    fn redirect(&self, packet: PacketBuf) -> Result<(), TunError> {
        self.redirected.lock().push(packet);
        Ok(())
    }

    fn set_real_num_queues(&self, name: &InterfaceName, queues: u16) {
        self.events
            .lock()
            .push(StackEvent::RealNumQueues(name.clone(), queues));
    }

    fn state_change(&self, name: &InterfaceName) {
        self.events
            .lock()
            .push(StackEvent::StateChange(name.clone()));
    }
}
