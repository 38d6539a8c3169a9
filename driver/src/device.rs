// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Virtual devices.
//!
//! A device is shared by every handle bound to it.  It owns the queue slot table, the flow
//! affinity cache, the MAC filter and the counters, and implements the stack facing side:
//! queue selection and transmit.

use crate::config::{
    DeviceKind, DriverConfig, NetdevFeatures, OffloadFlags, SNDBUF_UNLIMITED, TunFlags,
};
use crate::error::TunError;
use crate::filter::MacFilter;
use crate::handle::Handle;
use crate::marshal::{NAPI_POLL_WEIGHT, NET_SKB_PAD};
use crate::prog::{
    FilterLoader, FilterProgram, SocketFilter, SteeringProgram, XdpAction, XdpProgram,
};
use crate::queue::QueueTable;
use crate::registry::Registry;
use crate::stack::{AccessGate, Credentials, NetStack};
use crate::sync::NetSync;
use flow_entry::gc::FlowGc;
use flow_entry::{Clock, FlowCache};
use net::eth::EthHeader;
use net::eth::mac::Mac;
use net::header::vnet::{Endian, VNET_HDR_LEN};
use net::interface::InterfaceName;
use net::packet::PacketBuf;
use net::packet::hash::Link;
use parking_lot::{Mutex, RwLock};
use stats::{DeviceStats, StatsSnapshot};
use std::collections::hash_map::RandomState;
use std::fmt::{Debug, Formatter};
use std::hash::BuildHasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Outcome of [`Device::start_xmit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmitVerdict {
    /// The packet is waiting in a handle's ring.
    Queued,
    /// The packet was dropped and counted.
    Dropped,
}

/// Collaborators handed to every device.
#[derive(Debug, Clone)]
pub(crate) struct Collaborators {
    pub(crate) stack: Arc<dyn NetStack>,
    pub(crate) gate: Arc<dyn AccessGate>,
    pub(crate) loader: Arc<dyn FilterLoader>,
    pub(crate) clock: Arc<dyn Clock>,
}

/// Settings changed only by control requests.
#[derive(Debug, Clone)]
struct Settings {
    owner: Option<u32>,
    group: Option<u32>,
    hwaddr: Mac,
    offload: OffloadFlags,
    features: NetdevFeatures,
    sndbuf: usize,
    fprog: Option<FilterProgram>,
    filter_attached: bool,
}

/// At most one event per interval.
///
/// The window is not fixed: an allowed event at `t` opens the next window at
/// `t + INTERVAL`, and refused events do not move it.
#[derive(Debug, Default)]
struct RateLimit {
    next: AtomicU64,
}

impl RateLimit {
    const INTERVAL: Duration = Duration::from_secs(1);

    fn allow(&self, now: Duration) -> bool {
        let now = u64::try_from(now.as_nanos()).unwrap_or(u64::MAX);
        let next = self.next.load(Ordering::Relaxed);
        if now < next {
            return false;
        }
        let interval = u64::try_from(Self::INTERVAL.as_nanos()).unwrap_or(u64::MAX);
        self.next
            .compare_exchange(
                next,
                now.saturating_add(interval),
                Ordering::Relaxed,
                Ordering::Relaxed,
            )
            .is_ok()
    }
}

/// A locally administered unicast address, different for every call.
fn random_mac() -> Mac {
    let bits = RandomState::new().hash_one(std::time::SystemTime::now());
    let [a, b, c, d, e, f, _, _] = bits.to_le_bytes();
    Mac([(a & 0xfe) | 0x02, b, c, d, e, f])
}

/// A virtual device.
pub struct Device {
    name: InterfaceName,
    kind: DeviceKind,
    flags: AtomicU32,
    settings: RwLock<Settings>,
    pub(crate) queues: QueueTable,
    flows: Arc<FlowCache>,
    gc: Mutex<Option<FlowGc>>,
    filter: MacFilter,
    stats: DeviceStats,
    pub(crate) sync: NetSync,
    xdp: RwLock<Option<Arc<dyn XdpProgram>>>,
    steering: RwLock<Option<Arc<dyn SteeringProgram>>>,
    filter_prog: RwLock<Option<Arc<dyn SocketFilter>>>,
    collaborators: Collaborators,
    registered: AtomicBool,
    up: AtomicBool,
    carrier: AtomicBool,
    vnet_hdr_sz: AtomicUsize,
    align: AtomicUsize,
    rx_batched: AtomicU32,
    tx_queue_len: AtomicUsize,
    error_log: RateLimit,
}

impl Device {
    pub(crate) fn new(
        name: InterfaceName,
        kind: DeviceKind,
        flags: TunFlags,
        config: &DriverConfig,
        collaborators: Collaborators,
    ) -> Device {
        let flags = kind.flag() | (flags & TunFlags::FEATURES);
        let hwaddr = match kind {
            DeviceKind::Tap => random_mac(),
            DeviceKind::Tun => Mac::ZERO,
        };
        Device {
            name,
            kind,
            flags: AtomicU32::new(flags.bits()),
            settings: RwLock::new(Settings {
                owner: None,
                group: None,
                hwaddr,
                offload: OffloadFlags::empty(),
                features: NetdevFeatures::empty(),
                sndbuf: config.sndbuf,
                fprog: None,
                filter_attached: false,
            }),
            queues: QueueTable::default(),
            flows: Arc::new(FlowCache::new(collaborators.clock.clone(), config.ageing)),
            gc: Mutex::new(None),
            filter: MacFilter::new(),
            stats: DeviceStats::new(),
            sync: NetSync::default(),
            xdp: RwLock::new(None),
            steering: RwLock::new(None),
            filter_prog: RwLock::new(None),
            collaborators,
            registered: AtomicBool::new(false),
            up: AtomicBool::new(false),
            carrier: AtomicBool::new(false),
            vnet_hdr_sz: AtomicUsize::new(VNET_HDR_LEN),
            align: AtomicUsize::new(NET_SKB_PAD),
            rx_batched: AtomicU32::new(0),
            tx_queue_len: AtomicUsize::new(config.tx_queue_len),
            error_log: RateLimit::default(),
        }
    }

    /// The device name.
    #[must_use]
    pub fn name(&self) -> &InterfaceName {
        &self.name
    }

    /// Tun or tap.
    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Current flags.
    #[must_use]
    pub fn flags(&self) -> TunFlags {
        TunFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    pub(crate) fn insert_flags(&self, flags: TunFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn remove_flags(&self, flags: TunFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Replace the bind-time feature flags with those of `requested`.
    pub(crate) fn set_feature_flags(&self, requested: TunFlags) {
        let _ = self
            .flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let current = TunFlags::from_bits_retain(bits);
                Some(((current - TunFlags::FEATURES) | (requested & TunFlags::FEATURES)).bits())
            });
    }

    /// The queue slot table.
    #[must_use]
    pub fn queues(&self) -> &QueueTable {
        &self.queues
    }

    /// The flow affinity cache.
    #[must_use]
    pub fn flows(&self) -> &Arc<FlowCache> {
        &self.flows
    }

    /// The MAC filter.
    #[must_use]
    pub fn filter(&self) -> &MacFilter {
        &self.filter
    }

    /// Merged counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn counters(&self) -> &DeviceStats {
        &self.stats
    }

    pub(crate) fn stack(&self) -> &Arc<dyn NetStack> {
        &self.collaborators.stack
    }

    pub(crate) fn gate(&self) -> &Arc<dyn AccessGate> {
        &self.collaborators.gate
    }

    pub(crate) fn loader(&self) -> &Arc<dyn FilterLoader> {
        &self.collaborators.loader
    }

    /// Owning user, if restricted.
    #[must_use]
    pub fn owner(&self) -> Option<u32> {
        self.settings.read().owner
    }

    /// Owning group, if restricted.
    #[must_use]
    pub fn group(&self) -> Option<u32> {
        self.settings.read().group
    }

    pub(crate) fn set_owner(&self, owner: Option<u32>) {
        self.settings.write().owner = owner;
    }

    pub(crate) fn set_group(&self, group: Option<u32>) {
        self.settings.write().group = group;
    }

    /// Returns true if `creds` may not bind to this device.
    pub(crate) fn not_capable(&self, creds: &Credentials) -> bool {
        let settings = self.settings.read();
        let foreign_owner = settings.owner.is_some_and(|uid| uid != creds.uid);
        let foreign_group = settings.group.is_some_and(|gid| !creds.in_group(gid));
        (foreign_owner || foreign_group) && !creds.net_admin
    }

    /// Returns true if the device outlives its last handle.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.flags().contains(TunFlags::PERSIST)
    }

    /// Returns true while the device is known to the stack.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub(crate) fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::Release);
    }

    /// Returns true if the device is administratively up.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// Bring the device administratively up or down.  Writes to a down device fail.
    pub fn set_up(&self, up: bool) {
        if self.up.swap(up, Ordering::AcqRel) != up {
            info!(device = %self.name, up, "administrative state changed");
            self.stack().state_change(&self.name);
        }
    }

    /// Carrier state.
    #[must_use]
    pub fn carrier(&self) -> bool {
        self.carrier.load(Ordering::Acquire)
    }

    /// Turn the carrier on or off.
    pub fn set_carrier(&self, carrier: bool) {
        self.carrier.store(carrier, Ordering::Release);
    }

    /// Hardware address (all zero for tun devices).
    #[must_use]
    pub fn hwaddr(&self) -> Mac {
        self.settings.read().hwaddr
    }

    pub(crate) fn set_hwaddr(&self, mac: Mac) -> Result<(), TunError> {
        if self.kind != DeviceKind::Tap {
            return Err(TunError::NotApplicable);
        }
        if !mac.is_valid_src() {
            return Err(TunError::InvalidArgument("not a unicast address"));
        }
        self.settings.write().hwaddr = mac;
        Ok(())
    }

    /// Offload flags announced by user space.
    #[must_use]
    pub fn offload(&self) -> OffloadFlags {
        self.settings.read().offload
    }

    /// Features derived from the offload flags.
    #[must_use]
    pub fn features(&self) -> NetdevFeatures {
        self.settings.read().features
    }

    pub(crate) fn set_offload(&self, offload: OffloadFlags) -> Result<NetdevFeatures, TunError> {
        let features = NetdevFeatures::from_offload(offload)?;
        let mut settings = self.settings.write();
        settings.offload = offload;
        settings.features = features;
        Ok(features)
    }

    /// Send buffer given to queues.
    #[must_use]
    pub fn sndbuf(&self) -> usize {
        self.settings.read().sndbuf
    }

    pub(crate) fn set_sndbuf(&self, _: &Registry, sndbuf: usize) -> Result<(), TunError> {
        if sndbuf == 0 {
            return Err(TunError::InvalidArgument("send buffer must be positive"));
        }
        let sndbuf = sndbuf.min(SNDBUF_UNLIMITED);
        self.settings.write().sndbuf = sndbuf;
        for handle in self.queues.handles() {
            handle.set_sndbuf(sndbuf);
        }
        Ok(())
    }

    /// Size of the offload header on the wire.
    #[must_use]
    pub fn vnet_hdr_sz(&self) -> usize {
        self.vnet_hdr_sz.load(Ordering::Acquire)
    }

    pub(crate) fn set_vnet_hdr_sz(&self, size: usize) -> Result<(), TunError> {
        if size < VNET_HDR_LEN {
            return Err(TunError::InvalidArgument("offload header too small"));
        }
        self.vnet_hdr_sz.store(size, Ordering::Release);
        Ok(())
    }

    /// Byte order of the offload header.
    #[must_use]
    pub fn vnet_endian(&self) -> Endian {
        let flags = self.flags();
        if flags.contains(TunFlags::VNET_LE) {
            Endian::Little
        } else if flags.contains(TunFlags::VNET_BE) {
            Endian::Big
        } else {
            Endian::native()
        }
    }

    /// Headroom reserved in front of written packets.
    #[must_use]
    pub fn headroom(&self) -> usize {
        self.align.load(Ordering::Relaxed)
    }

    /// Set the headroom reserved in front of written packets; `None` restores the default.
    pub fn set_rx_headroom(&self, headroom: Option<usize>) {
        self.align
            .store(headroom.unwrap_or(NET_SKB_PAD), Ordering::Relaxed);
    }

    /// Receive batch size.
    #[must_use]
    pub fn rx_batched(&self) -> u32 {
        self.rx_batched.load(Ordering::Relaxed)
    }

    /// Set the receive batch size, capped at [`NAPI_POLL_WEIGHT`].  Zero disables batching.
    pub fn set_rx_batched(&self, frames: u32) {
        self.rx_batched
            .store(frames.min(NAPI_POLL_WEIGHT), Ordering::Relaxed);
    }

    /// Ring length given to queues attached from now on.
    #[must_use]
    pub fn tx_queue_len(&self) -> usize {
        self.tx_queue_len.load(Ordering::Relaxed)
    }

    /// Change the ring length of queues attached from now on.
    pub fn set_tx_queue_len(&self, len: usize) {
        self.tx_queue_len.store(len, Ordering::Relaxed);
    }

    /// Install or remove the fast-path program run on written packets.
    pub fn set_xdp_program(&self, program: Option<Arc<dyn XdpProgram>>) {
        debug!(device = %self.name, installed = program.is_some(), "fast-path program");
        *self.xdp.write() = program;
    }

    pub(crate) fn xdp_program(&self) -> Option<Arc<dyn XdpProgram>> {
        self.xdp.read().clone()
    }

    /// Install or remove the queue steering program.
    pub fn set_steering_program(&self, program: Option<Arc<dyn SteeringProgram>>) {
        debug!(device = %self.name, installed = program.is_some(), "steering program");
        *self.steering.write() = program;
    }

    pub(crate) fn steering_program(&self) -> Option<Arc<dyn SteeringProgram>> {
        self.steering.read().clone()
    }

    /// Install or remove the device wide filter run on transmitted packets.
    pub fn set_device_filter(&self, program: Option<Arc<dyn SocketFilter>>) {
        *self.filter_prog.write() = program;
    }

    /// The stored socket filter program, if one was set.
    #[must_use]
    pub fn filter_program(&self) -> Option<FilterProgram> {
        self.settings.read().fprog.clone()
    }

    /// Returns true if the stored socket filter is attached to the queues.
    #[must_use]
    pub fn filter_attached(&self) -> bool {
        self.settings.read().filter_attached
    }

    pub(crate) fn attached_filter_program(&self) -> Option<FilterProgram> {
        let settings = self.settings.read();
        if settings.filter_attached {
            settings.fprog.clone()
        } else {
            None
        }
    }

    /// Load `program` onto every active queue; on failure the queues loaded so far are
    /// rolled back.
    pub(crate) fn attach_socket_filter(
        &self,
        _: &Registry,
        program: FilterProgram,
    ) -> Result<(), TunError> {
        let handles = self.queues.handles();
        self.settings.write().fprog = Some(program.clone());
        for (i, handle) in handles.iter().enumerate() {
            match self.loader().load(&program) {
                Ok(filter) => handle.set_socket_filter(Some(filter)),
                Err(err) => {
                    warn!(device = %self.name, queue = i, %err, "socket filter attach failed");
                    for handle in &handles[..i] {
                        handle.set_socket_filter(None);
                    }
                    self.settings.write().filter_attached = false;
                    return Err(TunError::FilterAttachFailed(err.to_string()));
                }
            }
        }
        self.settings.write().filter_attached = true;
        Ok(())
    }

    pub(crate) fn detach_socket_filter(&self, _: &Registry) {
        for handle in self.queues.handles() {
            handle.set_socket_filter(None);
        }
        self.settings.write().filter_attached = false;
    }

    pub(crate) fn link(&self) -> Link {
        match self.kind {
            DeviceKind::Tap => Link::Ethernet,
            DeviceKind::Tun => Link::Raw,
        }
    }

    pub(crate) fn now(&self) -> Duration {
        self.collaborators.clock.now()
    }

    pub(crate) fn log_allowed(&self) -> bool {
        self.error_log.allow(self.now())
    }

    /// Pick the queue for a packet handed down by the stack.
    #[must_use]
    pub fn select_queue(&self, packet: &PacketBuf) -> u16 {
        let _section = self.sync.read();
        let numqueues = self.queues.active();
        if let Some(program) = self.steering_program() {
            if numqueues == 0 {
                return 0;
            }
            return u16::try_from(program.run(packet) % u32::from(numqueues)).unwrap_or(0);
        }
        match packet.meta().hash.or_else(|| packet.flow_hash(self.link())) {
            Some(hash) => {
                if let Some(entry) = self.flows.find(hash) {
                    FlowCache::save_rps_rxhash(&entry, hash);
                    entry.queue_index()
                } else {
                    scale(hash, numqueues)
                }
            }
            None => match packet.meta().rx_queue {
                Some(queue) if numqueues > 0 => queue % numqueues,
                _ => 0,
            },
        }
    }

    /// Pick a queue and hand the packet to it.
    pub fn transmit(&self, packet: PacketBuf) -> XmitVerdict {
        let queue = self.select_queue(&packet);
        self.start_xmit(packet, queue)
    }

    /// Hand a packet to the reader of queue `txq`.
    pub fn start_xmit(&self, mut packet: PacketBuf, txq: u16) -> XmitVerdict {
        let _section = self.sync.read();
        let Some(handle) = self.queues.get(txq) else {
            trace!(device = %self.name, txq, "no such queue");
            return self.tx_drop();
        };
        if self.steering_program().is_none() {
            self.record_rps(&packet);
        }
        if self.filter.is_enabled() {
            let mut head = [0u8; net::eth::ETH_HLEN];
            let copied = packet.copy_out(0, &mut head);
            let accepted = copied == head.len()
                && EthHeader::new(&head).is_some_and(|eth| self.filter.accept(eth.destination()));
            if !accepted {
                trace!(device = %self.name, "filtered by destination");
                return self.tx_drop();
            }
        }
        if let Some(filter) = handle.socket_filter() {
            let keep = filter.run(&packet);
            if !trim(&mut packet, keep) {
                return self.tx_drop();
            }
        }
        let device_filter = self.filter_prog.read().clone();
        if let Some(filter) = device_filter {
            let keep = filter.run(&packet);
            if !trim(&mut packet, keep) {
                return self.tx_drop();
            }
        }
        packet.orphan_frags();
        match handle.enqueue(packet) {
            Ok(()) => XmitVerdict::Queued,
            Err(_) => {
                trace!(device = %self.name, txq, "ring full");
                self.tx_drop()
            }
        }
    }

    fn tx_drop(&self) -> XmitVerdict {
        self.stats.tx_dropped();
        XmitVerdict::Dropped
    }

    /// Single queue devices keep no affinity but still note the hash of a known flow.
    fn record_rps(&self, packet: &PacketBuf) {
        if self.queues.active() != 1 {
            return;
        }
        if let Some(hash) = packet.meta().hash.or_else(|| packet.flow_hash(self.link())) {
            if let Some(entry) = self.flows.find(hash) {
                FlowCache::save_rps_rxhash(&entry, hash);
            }
        }
    }

    /// Bounce a written packet back out through queue `hint` (modulo the active count).
    pub(crate) fn xdp_xmit(&self, packet: PacketBuf, hint: u16) -> Result<(), TunError> {
        let _section = self.sync.read();
        let numqueues = self.queues.active();
        if numqueues == 0 {
            return Err(TunError::IoError("no queue attached"));
        }
        let handle = self
            .queues
            .get(hint % numqueues)
            .ok_or(TunError::IoError("queue went away"))?;
        handle.enqueue(packet).map_err(|_| {
            self.stats.tx_dropped();
            TunError::WouldBlock
        })
    }

    /// Run `program` on a written packet.  Returns the packet if it should continue to the
    /// stack.
    pub(crate) fn run_xdp(
        &self,
        program: &dyn XdpProgram,
        mut packet: PacketBuf,
        queue: u16,
    ) -> Option<PacketBuf> {
        let action = program.run(&mut packet);
        trace!(device = %self.name, ?action, "fast-path verdict");
        let len = packet.len();
        match action {
            XdpAction::Pass => return Some(packet),
            XdpAction::Redirect => match self.stack().redirect(packet) {
                Ok(()) => self.stats.rx(len),
                Err(err) => {
                    debug!(device = %self.name, %err, "redirect failed");
                    self.stats.rx_dropped();
                }
            },
            XdpAction::Tx => match self.xdp_xmit(packet, queue) {
                Ok(()) => self.stats.rx(len),
                Err(err) => {
                    debug!(device = %self.name, %err, "bounce failed");
                    self.stats.rx_dropped();
                }
            },
            XdpAction::Aborted => {
                warn!(device = %self.name, "fast-path program aborted");
                self.stats.rx_exceptions();
                self.stats.rx_dropped();
            }
            XdpAction::Drop => self.stats.rx_dropped(),
        }
        None
    }

    /// Note that `handle` carried a packet of flow `hash`.
    pub(crate) fn update_flow(&self, handle: &Handle, hash: u32) {
        let _section = self.sync.read();
        if self.queues.active() <= 1 || handle.is_detached() {
            return;
        }
        self.flows.update(hash, handle.queue_index());
    }

    pub(crate) fn start_gc(&self) {
        match FlowGc::spawn(self.name.as_str(), &self.flows) {
            Ok(gc) => *self.gc.lock() = Some(gc),
            Err(err) => warn!(device = %self.name, %err, "flow expiry thread not started"),
        }
    }

    /// Tear the device down: unbind every handle, forget every flow, tell the stack.
    #[tracing::instrument(level = "info", skip_all, fields(device = %self.name))]
    pub(crate) fn unregister(&self, reg: &Registry) {
        if !self.registered.swap(false, Ordering::AcqRel) {
            return;
        }
        self.detach_all(reg);
        if let Some(mut gc) = self.gc.lock().take() {
            gc.stop();
        }
        self.flows.stop_timer();
        self.flows.flush_all();
        self.set_carrier(false);
        self.stack().unregister_device(&self.name);
        info!("device unregistered");
    }
}

/// `(hash * n) >> 32`: spreads hashes evenly over `n` queues.
fn scale(hash: u32, numqueues: u16) -> u16 {
    u16::try_from((u64::from(hash) * u64::from(numqueues)) >> 32).unwrap_or(0)
}

/// Cut `packet` to `keep` bytes; false if nothing is kept.
fn trim(packet: &mut PacketBuf, keep: usize) -> bool {
    if keep == 0 {
        return false;
    }
    packet.truncate(keep);
    true
}

impl Debug for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("flags", &self.flags())
            .field("active", &self.queues.active())
            .field("disabled", &self.queues.disabled())
            .field("flows", &self.flows.len())
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scale_stays_in_range() {
        assert_eq!(scale(0, 4), 0);
        assert_eq!(scale(u32::MAX, 4), 3);
        assert_eq!(scale(0x8000_0000, 2), 1);
        assert_eq!(scale(12345, 0), 0);
    }

    #[test]
    fn rate_limit_one_per_second() {
        let limit = RateLimit::default();
        assert!(limit.allow(Duration::from_millis(10)));
        assert!(!limit.allow(Duration::from_millis(500)));
        assert!(limit.allow(Duration::from_millis(1010)));
    }

    #[test]
    fn random_mac_is_local_unicast() {
        let mac = random_mac();
        assert!(mac.is_local());
        assert!(!mac.is_multicast());
    }

    #[test]
    fn rate_limit_window_starts_at_the_last_allowed_event() {
        let limit = RateLimit::default();
        assert!(limit.allow(Duration::from_millis(5)));
        assert!(!limit.allow(Duration::from_millis(500)));
        assert!(limit.allow(Duration::from_millis(1005)));
        assert!(!limit.allow(Duration::from_millis(1006)));
    }

    #[test]
    fn trim_drops_on_zero() {
        let mut packet = PacketBuf::from_slice(b"abcdef");
        assert!(trim(&mut packet, 3));
        assert_eq!(packet.to_vec(), b"abc");
        assert!(!trim(&mut packet, 0));
    }
}
