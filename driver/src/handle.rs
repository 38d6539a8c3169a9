// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Open handles.
//!
//! A handle is what a process holds after opening the driver.  Once bound it owns a bounded
//! ring of packets waiting to be read; the device's transmit path is the producer and the
//! handle's readers are the consumers.

use crate::config::{PollFlags, SNDBUF_UNLIMITED, TunFlags};
use crate::device::Device;
use crate::error::TunError;
use crate::marshal::rx::{self, WriteOptions};
use crate::marshal::tx;
use crate::prog::SocketFilter;
use crate::stack::Credentials;
use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_queue::ArrayQueue;
use net::buffer::ByteSource;
use net::interface::InterfaceName;
use net::packet::PacketBuf;
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use tracing::trace;

/// Largest ring a handle will allocate.
pub const MAX_RING_LEN: usize = 1 << 20;

/// Callback fired when a packet lands in an empty or non-empty ring.
pub type Notify = Arc<dyn Fn() + Send + Sync>;

/// Where a handle stands with respect to its device.
#[derive(Debug, Clone)]
pub enum HandleState {
    /// Not bound to any device.
    Unbound,
    /// Holding active queue `index` of `device`.
    Attached {
        /// The device.
        device: Arc<Device>,
        /// The queue slot held.
        index: u16,
    },
    /// Bound to `device` but parked in its disabled pool.
    Detached {
        /// The device.
        device: Arc<Device>,
    },
}

/// An open handle.
pub struct Handle {
    id: u64,
    creds: Credentials,
    /// The bound device; stays set while detached.
    pub(crate) tun: ArcSwapOption<Device>,
    /// The device this handle was detached from.
    pub(crate) detached: ArcSwapOption<Device>,
    queue_index: AtomicU16,
    ring: ArcSwap<ArrayQueue<PacketBuf>>,
    wait: Mutex<()>,
    wake: Condvar,
    shutdown: AtomicBool,
    interrupted: AtomicBool,
    nonblocking: AtomicBool,
    notify: RwLock<Option<Notify>>,
    socket_filter: RwLock<Option<Arc<dyn SocketFilter>>>,
    sndbuf: AtomicUsize,
    pub(crate) batch: Mutex<Vec<PacketBuf>>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl Handle {
    pub(crate) fn new(creds: Credentials, sndbuf: usize) -> Handle {
        Handle {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            creds,
            tun: ArcSwapOption::empty(),
            detached: ArcSwapOption::empty(),
            queue_index: AtomicU16::new(0),
            ring: ArcSwap::from_pointee(ArrayQueue::new(1)),
            wait: Mutex::new(()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            nonblocking: AtomicBool::new(false),
            notify: RwLock::new(None),
            socket_filter: RwLock::new(None),
            sndbuf: AtomicUsize::new(sndbuf),
            batch: Mutex::new(Vec::new()),
        }
    }

    /// Process wide unique id, for logs.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Who opened the handle.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.creds
    }

    /// The device the handle is bound to (attached or detached).
    #[must_use]
    pub fn device(&self) -> Option<Arc<Device>> {
        self.tun.load_full()
    }

    /// Returns true if the handle sits in its device's disabled pool.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load().is_some()
    }

    /// The queue slot held while attached.
    #[must_use]
    pub fn queue_index(&self) -> u16 {
        self.queue_index.load(Ordering::Acquire)
    }

    pub(crate) fn set_queue_index(&self, index: u16) {
        self.queue_index.store(index, Ordering::Release);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HandleState {
        if let Some(device) = self.detached.load_full() {
            return HandleState::Detached { device };
        }
        match self.tun.load_full() {
            Some(device) => HandleState::Attached {
                device,
                index: self.queue_index(),
            },
            None => HandleState::Unbound,
        }
    }

    /// Make reads and writes fail with [`TunError::WouldBlock`] instead of waiting.
    pub fn set_nonblocking(&self, nonblocking: bool) {
        self.nonblocking.store(nonblocking, Ordering::Relaxed);
    }

    /// Returns true if the handle does not block.
    #[must_use]
    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking.load(Ordering::Relaxed)
    }

    /// Install (or remove) the callback fired whenever a packet is queued for reading.
    pub fn set_notify(&self, notify: Option<Notify>) {
        *self.notify.write() = notify;
    }

    /// Interrupt a blocked read; it returns [`TunError::Interrupted`].
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.wake_readers();
    }

    /// Send buffer size.
    #[must_use]
    pub fn sndbuf(&self) -> usize {
        self.sndbuf.load(Ordering::Relaxed)
    }

    pub(crate) fn set_sndbuf(&self, sndbuf: usize) {
        self.sndbuf.store(sndbuf, Ordering::Relaxed);
    }

    /// Returns true if writes may be built in place, without accounting.
    pub(crate) fn sndbuf_unlimited(&self) -> bool {
        self.sndbuf() == SNDBUF_UNLIMITED
    }

    pub(crate) fn socket_filter(&self) -> Option<Arc<dyn SocketFilter>> {
        self.socket_filter.read().clone()
    }

    pub(crate) fn set_socket_filter(&self, filter: Option<Arc<dyn SocketFilter>>) {
        *self.socket_filter.write() = filter;
    }

    /// Number of packets waiting to be read.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.ring.load().len()
    }

    /// Capacity of the ring.
    #[must_use]
    pub fn ring_capacity(&self) -> usize {
        self.ring.load().capacity()
    }

    /// Write one packet.
    ///
    /// Returns the number of bytes consumed, which is all of them on success.
    ///
    /// # Errors
    ///
    /// See [`Handle::write_with`].
    pub fn write(&self, src: impl Into<ByteSource>) -> Result<usize, TunError> {
        self.write_with(
            src.into(),
            WriteOptions {
                nonblocking: self.is_nonblocking(),
                ..WriteOptions::default()
            },
        )
    }

    /// Write one packet with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`TunError::NotBound`] if the handle is not bound, [`TunError::IoError`] if the
    /// device is down, and [`TunError::InvalidArgument`] or [`TunError::FrameError`] if the
    /// packet or its headers are malformed.
    pub fn write_with(&self, src: ByteSource, options: WriteOptions) -> Result<usize, TunError> {
        let device = self.device().ok_or(TunError::NotBound)?;
        rx::submit(&device, self, src, options)
    }

    /// Read one packet into `buf`.
    ///
    /// Returns the number of bytes stored; a packet longer than `buf` is cut short (and the
    /// rest of it lost).  A zero length read returns zero without consuming anything.
    ///
    /// # Errors
    ///
    /// Returns [`TunError::NotBound`] if the handle is not bound, [`TunError::WouldBlock`] if
    /// nothing is waiting on a non-blocking handle, [`TunError::Interrupted`] or
    /// [`TunError::IoError`] if a blocking read was interrupted or its device went away.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, TunError> {
        let device = self.device().ok_or(TunError::NotBound)?;
        tx::read(&device, self, buf, self.is_nonblocking())
    }

    /// Readiness.
    #[must_use]
    pub fn poll(&self) -> PollFlags {
        let Some(device) = self.device() else {
            return PollFlags::ERR;
        };
        if !device.is_registered() {
            return PollFlags::ERR;
        }
        let mut mask = PollFlags::OUT | PollFlags::WRNORM;
        if !self.ring.load().is_empty() {
            mask |= PollFlags::IN | PollFlags::RDNORM;
        }
        mask
    }

    /// Name and flags of the bound device as seen through this handle.
    ///
    /// # Errors
    ///
    /// Returns [`TunError::NotBound`] if the handle is not bound.
    pub fn status(&self) -> Result<(InterfaceName, TunFlags), TunError> {
        let device = self.device().ok_or(TunError::NotBound)?;
        let mut flags = device.flags()
            & (TunFlags::FEATURES | TunFlags::PERSIST | TunFlags::TUN | TunFlags::TAP);
        if self.is_detached() {
            flags |= TunFlags::DETACH_QUEUE;
        }
        if self.socket_filter.read().is_none() {
            flags |= TunFlags::NOFILTER;
        }
        Ok((device.name().clone(), flags))
    }

    /// Queue a packet for reading.
    pub(crate) fn enqueue(&self, packet: PacketBuf) -> Result<(), PacketBuf> {
        self.ring.load().push(packet)?;
        self.wake_readers();
        if let Some(notify) = self.notify.read().as_ref() {
            notify();
        }
        Ok(())
    }

    /// Take the oldest waiting packet, waiting for one unless `nonblocking`.
    pub(crate) fn recv(&self, nonblocking: bool) -> Result<PacketBuf, TunError> {
        if let Some(packet) = self.ring.load().pop() {
            return Ok(packet);
        }
        if nonblocking {
            return Err(TunError::WouldBlock);
        }
        let mut guard = self.wait.lock();
        loop {
            if let Some(packet) = self.ring.load().pop() {
                return Ok(packet);
            }
            if self.interrupted.swap(false, Ordering::AcqRel) {
                return Err(TunError::Interrupted);
            }
            if self.shutdown.load(Ordering::Acquire) {
                return Err(TunError::IoError("handle shut down"));
            }
            self.wake.wait(&mut guard);
        }
    }

    fn wake_readers(&self) {
        let _guard = self.wait.lock();
        self.wake.notify_all();
    }

    /// Stop readers: blocked and future blocking reads on an empty ring fail.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake_readers();
    }

    pub(crate) fn clear_shutdown(&self) {
        self.shutdown.store(false, Ordering::Release);
    }

    /// Drop every waiting packet.
    pub(crate) fn purge(&self) -> usize {
        let ring = self.ring.load();
        let mut purged = 0;
        while ring.pop().is_some() {
            purged += 1;
        }
        purged += std::mem::take(&mut *self.batch.lock()).len();
        if purged > 0 {
            trace!(handle = self.id, purged, "purged queued packets");
        }
        purged
    }

    /// Give the ring room for `len` packets, keeping as many waiting packets as fit.
    pub(crate) fn resize_ring(&self, len: usize) -> Result<(), TunError> {
        if len > MAX_RING_LEN {
            return Err(TunError::OutOfMemory);
        }
        let len = len.max(1);
        let old = self.ring.load_full();
        if old.capacity() == len {
            return Ok(());
        }
        let new = ArrayQueue::new(len);
        while let Some(packet) = old.pop() {
            if new.push(packet).is_err() {
                break;
            }
        }
        self.ring.store(Arc::new(new));
        Ok(())
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("device", &self.tun.load().as_ref().map(|d| d.name().clone()))
            .field("detached", &self.is_detached())
            .field("queue_index", &self.queue_index())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn handle() -> Arc<Handle> {
        let handle = Arc::new(Handle::new(Credentials::admin(), SNDBUF_UNLIMITED));
        handle.resize_ring(4).unwrap();
        handle
    }

    #[test]
    fn ring_is_fifo_and_bounded() {
        let handle = handle();
        for i in 0..4u8 {
            handle.enqueue(PacketBuf::from_slice(&[i])).unwrap();
        }
        assert!(handle.enqueue(PacketBuf::from_slice(&[9])).is_err());
        for i in 0..4u8 {
            assert_eq!(handle.recv(true).unwrap().to_vec(), vec![i]);
        }
        assert_eq!(handle.recv(true).unwrap_err(), TunError::WouldBlock);
    }

    #[test]
    fn resize_keeps_what_fits() {
        let handle = handle();
        for i in 0..4u8 {
            handle.enqueue(PacketBuf::from_slice(&[i])).unwrap();
        }
        handle.resize_ring(2).unwrap();
        assert_eq!(handle.pending(), 2);
        assert_eq!(handle.recv(true).unwrap().to_vec(), vec![0]);
        assert_eq!(handle.resize_ring(MAX_RING_LEN + 1), Err(TunError::OutOfMemory));
    }

    #[test]
    fn blocked_reader_wakes_on_packet() {
        let handle = handle();
        let reader = {
            let handle = handle.clone();
            std::thread::spawn(move || handle.recv(false))
        };
        std::thread::sleep(Duration::from_millis(20));
        handle.enqueue(PacketBuf::from_slice(b"x")).unwrap();
        assert_eq!(reader.join().unwrap().unwrap().to_vec(), b"x");
    }

    #[test]
    fn blocked_reader_interrupted() {
        let handle = handle();
        let reader = {
            let handle = handle.clone();
            std::thread::spawn(move || handle.recv(false))
        };
        std::thread::sleep(Duration::from_millis(20));
        handle.interrupt();
        assert_eq!(reader.join().unwrap().unwrap_err(), TunError::Interrupted);
    }

    #[test]
    fn blocked_reader_sees_shutdown() {
        let handle = handle();
        let reader = {
            let handle = handle.clone();
            std::thread::spawn(move || handle.recv(false))
        };
        std::thread::sleep(Duration::from_millis(20));
        handle.shutdown();
        assert!(matches!(
            reader.join().unwrap().unwrap_err(),
            TunError::IoError(_)
        ));
    }

    #[test]
    fn notify_fires_per_packet() {
        let handle = handle();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        handle.set_notify(Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })));
        handle.enqueue(PacketBuf::from_slice(b"a")).unwrap();
        handle.enqueue(PacketBuf::from_slice(b"b")).unwrap();
        assert_eq!(fired.load(Ordering::Relaxed), 2);
        assert_eq!(handle.purge(), 2);
    }

    #[test]
    fn unbound_handle() {
        let handle = handle();
        assert!(matches!(handle.state(), HandleState::Unbound));
        assert_eq!(handle.poll(), PollFlags::ERR);
        assert_eq!(handle.read(&mut [0u8; 4]), Err(TunError::NotBound));
        assert_eq!(handle.write(&b"abc"[..]), Err(TunError::NotBound));
        assert_eq!(handle.status().unwrap_err(), TunError::NotBound);
    }
}
