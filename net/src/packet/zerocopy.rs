// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Completion notification for writes whose memory is referenced by a packet.

use std::fmt::{Debug, Formatter};

/// Outcome reported to the writer when its memory is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroCopyStatus {
    /// The packet referenced the writer's memory and has now been released.
    ZeroCopied,
    /// The data was copied; the writer's memory was never referenced.
    Copied,
    /// The write failed before the memory was handed to a packet.
    Aborted,
}

type Callback = Box<dyn FnOnce(ZeroCopyStatus) + Send + Sync>;

/// A one-shot callback fired when a writer's memory is no longer referenced.
///
/// The callback fires exactly once: explicitly through [`ZeroCopyCompletion::complete`], or on
/// drop.  A completion dropped after [`ZeroCopyCompletion::mark_zerocopy`] reports
/// [`ZeroCopyStatus::ZeroCopied`]; otherwise it reports [`ZeroCopyStatus::Aborted`].
pub struct ZeroCopyCompletion {
    callback: Option<Callback>,
    status: ZeroCopyStatus,
}

impl ZeroCopyCompletion {
    /// Create a completion which calls `callback` when fired.
    #[must_use]
    pub fn new(callback: impl FnOnce(ZeroCopyStatus) + Send + Sync + 'static) -> Self {
        ZeroCopyCompletion {
            callback: Some(Box::new(callback)),
            status: ZeroCopyStatus::Aborted,
        }
    }

    /// Report that the memory will be referenced by a packet until it is dropped.
    pub fn mark_zerocopy(&mut self) {
        self.status = ZeroCopyStatus::ZeroCopied;
    }

    /// Fire the completion now with `status`.
    pub fn complete(mut self, status: ZeroCopyStatus) {
        self.status = status;
    }
}

impl Drop for ZeroCopyCompletion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(self.status);
        }
    }
}

impl Debug for ZeroCopyCompletion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroCopyCompletion")
            .field("fired", &self.callback.is_none())
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::PacketBuf;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<ZeroCopyStatus>>>, ZeroCopyCompletion) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let completion = ZeroCopyCompletion::new(move |status| sink.lock().unwrap().push(status));
        (seen, completion)
    }

    #[test]
    fn fires_once_on_complete() {
        let (seen, completion) = recorder();
        completion.complete(ZeroCopyStatus::Copied);
        assert_eq!(*seen.lock().unwrap(), vec![ZeroCopyStatus::Copied]);
    }

    #[test]
    fn unused_completion_reports_abort() {
        let (seen, completion) = recorder();
        drop(completion);
        assert_eq!(*seen.lock().unwrap(), vec![ZeroCopyStatus::Aborted]);
    }

    #[test]
    fn fires_when_last_packet_clone_drops() {
        let (seen, mut completion) = recorder();
        completion.mark_zerocopy();
        let mut pkt = PacketBuf::from_slice(b"payload");
        pkt.attach_zerocopy(Arc::new(completion));
        let clone = pkt.clone();
        drop(pkt);
        assert!(seen.lock().unwrap().is_empty());
        drop(clone);
        assert_eq!(*seen.lock().unwrap(), vec![ZeroCopyStatus::ZeroCopied]);
    }

    #[test]
    fn orphaning_releases_user_memory() {
        let (seen, mut completion) = recorder();
        completion.mark_zerocopy();
        let mut pkt = PacketBuf::new(0, 0);
        pkt.push_frag(bytes::Bytes::from_static(b"user")).unwrap();
        pkt.attach_zerocopy(Arc::new(completion));
        pkt.orphan_frags();
        assert!(!pkt.is_zerocopy());
        assert_eq!(*seen.lock().unwrap(), vec![ZeroCopyStatus::ZeroCopied]);
        assert_eq!(pkt.to_vec(), b"user");
    }
}
