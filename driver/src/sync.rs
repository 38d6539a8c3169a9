// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Read-side discipline for the queue slot table.
//!
//! Packet paths hold a [`ReadSection`] while they look up and use a slot.  A structural change
//! publishes its new state, then calls [`NetSync::synchronize`], which returns once every
//! section that might have seen the old state has ended.

use parking_lot::{RwLock, RwLockReadGuard};

#[derive(Debug, Default)]
pub(crate) struct NetSync(RwLock<()>);

/// Proof that a read-side section is open.
pub(crate) type ReadSection<'a> = RwLockReadGuard<'a, ()>;

impl NetSync {
    /// Open a read-side section.  Sections nest.
    pub(crate) fn read(&self) -> ReadSection<'_> {
        self.0.read_recursive()
    }

    /// Wait for every open section to end.
    pub(crate) fn synchronize(&self) {
        drop(self.0.write());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn synchronize_waits_for_readers() {
        let sync = Arc::new(NetSync::default());
        let done = Arc::new(AtomicBool::new(false));
        let section = sync.read();
        let waiter = {
            let sync = sync.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                sync.synchronize();
                done.store(true, Ordering::SeqCst);
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!done.load(Ordering::SeqCst));
        drop(section);
        waiter.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn sections_nest() {
        let sync = NetSync::default();
        let outer = sync.read();
        let inner = sync.read();
        drop(inner);
        drop(outer);
        sync.synchronize();
    }
}
