// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Background thread firing the flow cache collection timer.

use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

use crate::flow_table::FlowCache;

/// Upper bound on how long the thread sleeps before checking whether it should exit.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Handle to a running collection thread.  Stops the thread when dropped.
#[derive(Debug)]
pub struct FlowGc {
    stop: Arc<AtomicBool>,
    cache: Weak<FlowCache>,
    thread: Option<JoinHandle<()>>,
}

impl FlowGc {
    /// Spawn a thread collecting `cache` whenever its timer is due.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread could not be spawned.
    pub fn spawn(name: &str, cache: &Arc<FlowCache>) -> std::io::Result<FlowGc> {
        let stop = Arc::new(AtomicBool::new(false));
        let weak = Arc::downgrade(cache);
        let thread = std::thread::Builder::new()
            .name(format!("flow-gc-{name}"))
            .spawn({
                let stop = stop.clone();
                let weak = weak.clone();
                move || run(&weak, &stop)
            })?;
        debug!(name, "flow gc thread started");
        Ok(FlowGc {
            stop,
            cache: weak,
            thread: Some(thread),
        })
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(cache) = self.cache.upgrade() {
            cache.stop_timer();
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("flow gc thread panicked");
        }
    }
}

impl Drop for FlowGc {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(cache: &Weak<FlowCache>, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        let Some(cache) = cache.upgrade() else {
            break;
        };
        if !cache.wait_timer(IDLE_POLL) {
            break;
        }
        cache.run_expired_timer();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::MonotonicClock;

    #[test]
    fn thread_reclaims_expired_entries() {
        let cache = Arc::new(FlowCache::new(
            Arc::new(MonotonicClock::new()),
            Duration::from_millis(20),
        ));
        let mut gc = FlowGc::spawn("test", &cache).unwrap();
        cache.update(1, 0);
        let give_up = std::time::Instant::now() + Duration::from_secs(5);
        while !cache.is_empty() && std::time::Instant::now() < give_up {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(cache.is_empty());
        gc.stop();
        assert_eq!(cache.deadline(), None);
    }
}
