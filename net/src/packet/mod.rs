// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The packet buffer object exchanged between user buffers and the networking stack.

pub mod hash;
pub mod meta;
pub mod zerocopy;

use crate::buffer::{Append, NotEnoughTailRoom};
use arrayvec::ArrayVec;
use bytes::Bytes;
use std::sync::Arc;

pub use meta::{Checksum, Gso, GsoKind, PacketMeta};
pub use zerocopy::{ZeroCopyCompletion, ZeroCopyStatus};

/// Maximum number of fragments a [`PacketBuf`] may reference besides its linear area.
pub const MAX_FRAGS: usize = 17;

/// Error returned when a [`PacketBuf`] has no fragment slot left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("packet already references {MAX_FRAGS} fragments")]
pub struct TooManyFrags;

/// A packet: a linear area (with reserved headroom) followed by zero or more shared fragments.
///
/// Fragments are reference counted slices of user memory (zero-copy writes) or of pages
/// allocated by the writer.  Logical packet content is the linear area followed by the
/// fragments in order.
#[derive(Debug, Clone)]
pub struct PacketBuf {
    data: Vec<u8>,
    start: usize,
    end: usize,
    frags: ArrayVec<Bytes, MAX_FRAGS>,
    meta: PacketMeta,
    zerocopy: Option<Arc<ZeroCopyCompletion>>,
}

impl PacketBuf {
    /// Allocate an empty packet with `headroom` reserved bytes and room for `linear` bytes.
    #[must_use]
    pub fn new(headroom: usize, linear: usize) -> PacketBuf {
        PacketBuf {
            data: vec![0; headroom + linear],
            start: headroom,
            end: headroom,
            frags: ArrayVec::new(),
            meta: PacketMeta::default(),
            zerocopy: None,
        }
    }

    /// A packet whose linear area holds a copy of `bytes`.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> PacketBuf {
        PacketBuf {
            data: bytes.to_vec(),
            start: 0,
            end: bytes.len(),
            frags: ArrayVec::new(),
            meta: PacketMeta::default(),
            zerocopy: None,
        }
    }

    /// The linear area.
    #[must_use]
    pub fn linear(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// The linear area, mutably.
    pub fn linear_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.start..self.end]
    }

    /// Length of the linear area.
    #[must_use]
    pub fn linear_len(&self) -> usize {
        self.end - self.start
    }

    /// Fragments following the linear area.
    #[must_use]
    pub fn frags(&self) -> &[Bytes] {
        &self.frags
    }

    /// Append a fragment.
    ///
    /// # Errors
    ///
    /// Returns [`TooManyFrags`] if [`MAX_FRAGS`] fragments are already referenced.
    pub fn push_frag(&mut self, frag: Bytes) -> Result<(), TooManyFrags> {
        if frag.is_empty() {
            return Ok(());
        }
        self.frags.try_push(frag).map_err(|_| TooManyFrags)
    }

    /// Total length of the packet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.linear_len() + self.frags.iter().map(Bytes::len).sum::<usize>()
    }

    /// Returns true if the packet holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy packet content starting at `offset` into `dst`.
    ///
    /// Returns the number of bytes copied (short if the packet ends first).
    pub fn copy_out(&self, offset: usize, dst: &mut [u8]) -> usize {
        let mut skip = offset;
        let mut written = 0;
        let segments = std::iter::once(self.linear()).chain(self.frags.iter().map(AsRef::as_ref));
        for segment in segments {
            if written == dst.len() {
                break;
            }
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let segment = &segment[skip..];
            skip = 0;
            let n = segment.len().min(dst.len() - written);
            dst[written..written + n].copy_from_slice(&segment[..n]);
            written += n;
        }
        written
    }

    /// The whole packet as one contiguous vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0; self.len()];
        self.copy_out(0, &mut out);
        out
    }

    /// Shorten the packet to `len` bytes, dropping fragments as needed.
    ///
    /// Does nothing if the packet is already at most `len` bytes long.
    pub fn truncate(&mut self, len: usize) {
        let mut excess = self.len().saturating_sub(len);
        while excess > 0 {
            let Some(last) = self.frags.last_mut() else {
                break;
            };
            if last.len() > excess {
                last.truncate(last.len() - excess);
                return;
            }
            excess -= last.len();
            self.frags.pop();
        }
        self.end -= excess.min(self.linear_len());
    }

    /// Metadata describing the packet.
    #[must_use]
    pub fn meta(&self) -> &PacketMeta {
        &self.meta
    }

    /// Metadata describing the packet, mutably.
    pub fn meta_mut(&mut self) -> &mut PacketMeta {
        &mut self.meta
    }

    /// Tie the lifetime of user memory referenced by the fragments to this packet.
    ///
    /// The completion fires when the last clone of the packet is dropped.
    pub fn attach_zerocopy(&mut self, completion: Arc<ZeroCopyCompletion>) {
        self.zerocopy = Some(completion);
    }

    /// Returns true if the packet references user memory.
    #[must_use]
    pub fn is_zerocopy(&self) -> bool {
        self.zerocopy.is_some()
    }

    /// Copy fragments referencing user memory into memory owned by the packet, releasing this
    /// packet's hold on the writer's completion.
    pub fn orphan_frags(&mut self) {
        if self.zerocopy.take().is_some() {
            for frag in &mut self.frags {
                *frag = Bytes::copy_from_slice(frag);
            }
        }
    }
}

impl Append for PacketBuf {
    type Error = NotEnoughTailRoom;

    fn append(&mut self, len: usize) -> Result<&mut [u8], Self::Error> {
        if !self.frags.is_empty() || len > self.data.len() - self.end {
            return Err(NotEnoughTailRoom);
        }
        let old_end = self.end;
        self.end += len;
        Ok(&mut self.data[old_end..self.end])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::Append;

    fn fragmented() -> PacketBuf {
        let mut pkt = PacketBuf::new(16, 4);
        pkt.append(4).unwrap().copy_from_slice(b"head");
        pkt.push_frag(Bytes::from_static(b"-one")).unwrap();
        pkt.push_frag(Bytes::from_static(b"-two")).unwrap();
        pkt
    }

    #[test]
    fn logical_content_spans_fragments() {
        let pkt = fragmented();
        assert_eq!(pkt.len(), 12);
        assert_eq!(pkt.to_vec(), b"head-one-two");
        let mut mid = [0u8; 6];
        assert_eq!(pkt.copy_out(3, &mut mid), 6);
        assert_eq!(&mid, b"d-one-");
        let mut tail = [0u8; 8];
        assert_eq!(pkt.copy_out(10, &mut tail), 2);
    }

    #[test]
    fn append_refused_after_fragments() {
        let mut pkt = fragmented();
        assert!(pkt.append(1).is_err());
    }

    #[test]
    fn truncate_drops_from_the_end() {
        let mut pkt = fragmented();
        pkt.truncate(6);
        assert_eq!(pkt.to_vec(), b"head-o");
        assert_eq!(pkt.frags().len(), 1);
        pkt.truncate(2);
        assert_eq!(pkt.to_vec(), b"he");
        assert!(pkt.frags().is_empty());
        pkt.truncate(0);
        assert!(pkt.is_empty());
    }

    #[test]
    fn fragment_limit_is_enforced() {
        let mut pkt = PacketBuf::new(0, 0);
        for _ in 0..MAX_FRAGS {
            pkt.push_frag(Bytes::from_static(b"x")).unwrap();
        }
        assert_eq!(pkt.push_frag(Bytes::from_static(b"x")), Err(TooManyFrags));
        assert_eq!(pkt.len(), MAX_FRAGS);
    }
}
