// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The [`Append`] buffer trait and the scatter/gather [`ByteSource`] consumed by writes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use core::fmt::Debug;
use std::collections::VecDeque;

use crate::PAGE_SIZE;

/// Trait representing the ability to append data to a packet buffer.
pub trait Append {
    /// Error which may occur when attempting to append data to the buffer.
    type Error: Debug;
    /// Grow the buffer by `len` bytes and return the newly exposed region.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if an error occurs while performing this operation.
    /// For example, there may not be enough tailroom available.
    fn append(&mut self, len: usize) -> Result<&mut [u8], Self::Error>;
}

/// Error indicating that there is not enough tailroom in a memory buffer for the requested
/// operation.
#[non_exhaustive]
#[repr(transparent)]
#[derive(Debug, thiserror::Error)]
#[error("Not enough tail room in memory buffer")]
pub struct NotEnoughTailRoom;

/// Error returned when a [`ByteSource`] runs dry before a copy completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("byte source exhausted: wanted {wanted} bytes, {available} available")]
pub struct SourceExhausted {
    /// Bytes requested.
    pub wanted: usize,
    /// Bytes which were left in the source.
    pub available: usize,
}

/// A cursor over a list of user supplied segments (an io vector).
///
/// Segments are [`Bytes`], so ranges of them may be handed to a packet without copying (this
/// is what zero-copy writes do).  Empty segments are discarded on construction.
#[derive(Debug, Clone, Default)]
pub struct ByteSource {
    segments: VecDeque<Bytes>,
    remaining: usize,
}

impl ByteSource {
    /// Build a source out of the given segments.
    #[must_use]
    pub fn new(segments: impl IntoIterator<Item = Bytes>) -> ByteSource {
        let segments: VecDeque<Bytes> = segments.into_iter().filter(|s| !s.is_empty()).collect();
        let remaining = segments.iter().map(Bytes::len).sum();
        ByteSource {
            segments,
            remaining,
        }
    }

    /// Number of bytes left.
    #[must_use]
    pub fn len(&self) -> usize {
        self.remaining
    }

    /// Returns true if no bytes are left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// Copy exactly `dst.len()` bytes out of the source, consuming them.
    ///
    /// # Errors
    ///
    /// Returns [`SourceExhausted`] (and consumes nothing) if fewer bytes are available.
    pub fn read_exact(&mut self, dst: &mut [u8]) -> Result<(), SourceExhausted> {
        if dst.len() > self.remaining {
            return Err(SourceExhausted {
                wanted: dst.len(),
                available: self.remaining,
            });
        }
        self.copy_to_slice(dst);
        Ok(())
    }

    /// Consume `len` bytes without copying them.
    ///
    /// # Errors
    ///
    /// Returns [`SourceExhausted`] (and consumes nothing) if fewer bytes are available.
    pub fn skip(&mut self, len: usize) -> Result<(), SourceExhausted> {
        if len > self.remaining {
            return Err(SourceExhausted {
                wanted: len,
                available: self.remaining,
            });
        }
        self.advance(len);
        Ok(())
    }

    /// Number of memory pages the next `len` bytes are spread over, counting each segment as
    /// starting on a fresh page.  Stops counting once `max` is exceeded.
    #[must_use]
    pub fn npages(&self, len: usize, max: usize) -> usize {
        let mut pages = 0;
        let mut left = len;
        for segment in &self.segments {
            if left == 0 || pages > max {
                break;
            }
            let take = segment.len().min(left);
            pages += take.div_ceil(PAGE_SIZE);
            left -= take;
        }
        pages
    }

    /// Split the next `len` bytes off the source as shared segments, without copying.
    ///
    /// Each returned [`Bytes`] references the user segment it came from.
    ///
    /// # Errors
    ///
    /// Returns [`SourceExhausted`] (and consumes nothing) if fewer bytes are available.
    pub fn split_segments(&mut self, len: usize) -> Result<Vec<Bytes>, SourceExhausted> {
        if len > self.remaining {
            return Err(SourceExhausted {
                wanted: len,
                available: self.remaining,
            });
        }
        let mut out = Vec::new();
        let mut left = len;
        while left > 0 {
            let chunk = self.chunk().len().min(left);
            out.push(self.copy_to_bytes(chunk));
            left -= chunk;
        }
        Ok(out)
    }
}

impl From<&[u8]> for ByteSource {
    fn from(value: &[u8]) -> Self {
        ByteSource::new([Bytes::copy_from_slice(value)])
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(value: Vec<u8>) -> Self {
        ByteSource::new([Bytes::from(value)])
    }
}

impl From<Bytes> for ByteSource {
    fn from(value: Bytes) -> Self {
        ByteSource::new([value])
    }
}

impl Buf for ByteSource {
    fn remaining(&self) -> usize {
        self.remaining
    }

    fn chunk(&self) -> &[u8] {
        match self.segments.front() {
            Some(segment) => segment,
            None => &[],
        }
    }

    fn advance(&mut self, cnt: usize) {
        let mut cnt = cnt.min(self.remaining);
        self.remaining -= cnt;
        while cnt > 0 {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            if front.len() > cnt {
                front.advance(cnt);
                break;
            }
            cnt -= front.len();
            self.segments.pop_front();
        }
    }

    fn copy_to_bytes(&mut self, len: usize) -> Bytes {
        match self.segments.front_mut() {
            Some(front) if front.len() >= len => {
                let out = front.split_to(len);
                if front.is_empty() {
                    self.segments.pop_front();
                }
                self.remaining -= len;
                out
            }
            _ => {
                let mut out = BytesMut::with_capacity(len);
                out.put((&mut *self).take(len));
                out.freeze()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;

    fn source() -> ByteSource {
        ByteSource::new([
            Bytes::from_static(b"abc"),
            Bytes::new(),
            Bytes::from_static(b"defgh"),
        ])
    }

    #[test]
    fn reads_across_segments() {
        let mut src = source();
        assert_eq!(src.len(), 8);
        let mut head = [0u8; 4];
        src.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"abcd");
        assert_eq!(src.len(), 4);
        let mut too_much = [0u8; 5];
        assert_eq!(
            src.read_exact(&mut too_much),
            Err(SourceExhausted {
                wanted: 5,
                available: 4
            })
        );
        assert_eq!(src.len(), 4);
    }

    #[test]
    fn split_segments_shares_memory() {
        let backing = Bytes::from(vec![7u8; 100]);
        let mut src = ByteSource::new([Bytes::from_static(b"xy"), backing.clone()]);
        src.skip(2).unwrap();
        let segments = src.split_segments(60).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].as_ptr(), backing.as_ptr());
        assert_eq!(src.len(), 40);
    }

    #[test]
    fn page_count() {
        let src = ByteSource::new([
            Bytes::from(vec![0u8; PAGE_SIZE + 1]),
            Bytes::from(vec![0u8; 10]),
        ]);
        assert_eq!(src.npages(PAGE_SIZE + 11, 64), 3);
        assert_eq!(src.npages(10, 64), 1);
    }

    #[test]
    fn consuming_any_prefix_keeps_the_rest() {
        bolero::check!()
            .with_type()
            .cloned()
            .for_each(|(parts, cut): (Vec<Vec<u8>>, usize)| {
                let flat: Vec<u8> = parts.iter().flatten().copied().collect();
                let mut src = ByteSource::new(parts.into_iter().map(Bytes::from));
                let cut = if flat.is_empty() { 0 } else { cut % flat.len() };
                src.skip(cut).unwrap();
                let mut rest = vec![0u8; flat.len() - cut];
                src.read_exact(&mut rest).unwrap();
                assert_eq!(rest, flat[cut..]);
                assert!(src.is_empty());
            });
    }
}
