// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The read path: a packet from the stack to user bytes.

use crate::config::TunFlags;
use crate::device::Device;
use crate::error::TunError;
use crate::handle::Handle;
use net::header::pi::{PI_LEN, PiHeader};
use net::header::vnet::{VNET_HDR_LEN, VnetHdr};
use net::packet::PacketBuf;
use net::vlan::{VLAN_HLEN, VLAN_OFFSET};
use tracing::error;

/// A user buffer being filled front to back.
struct Sink<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Sink<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Sink { buf, pos: 0 }
    }

    fn room(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn put(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.room());
        self.buf[self.pos..self.pos + n].copy_from_slice(&bytes[..n]);
        self.pos += n;
    }

    fn zero(&mut self, len: usize) {
        let n = len.min(self.room());
        self.buf[self.pos..self.pos + n].fill(0);
        self.pos += n;
    }

    /// Copy `len` bytes of `packet` starting at `offset`.
    fn put_packet(&mut self, packet: &PacketBuf, offset: usize, len: usize) {
        let n = len.min(self.room());
        self.pos += packet.copy_out(offset, &mut self.buf[self.pos..self.pos + n]);
    }
}

/// Read the next packet queued for `handle` into `buf`.
///
/// # Errors
///
/// See [`Handle::read`](crate::handle::Handle::read).
pub fn read(
    device: &Device,
    handle: &Handle,
    buf: &mut [u8],
    nonblocking: bool,
) -> Result<usize, TunError> {
    if buf.is_empty() {
        return Ok(0);
    }
    let packet = handle.recv(nonblocking)?;
    let written = deliver(device, &packet, buf)?;
    Ok(written.min(buf.len()))
}

/// Write `packet` into `sink`, preceded by the headers the device is configured for.
///
/// A sink too short for the whole packet receives as much as fits; the packet information
/// header (if any) then carries [`PiHeader::TUN_PKT_STRIP`].  Returns the number of bytes
/// written.
///
/// # Errors
///
/// [`TunError::InvalidArgument`] if `sink` cannot hold the configured headers and
/// [`TunError::FrameError`] if the packet's offload metadata cannot be expressed in an offload
/// header.
pub fn deliver(device: &Device, packet: &PacketBuf, sink: &mut [u8]) -> Result<usize, TunError> {
    let flags = device.flags();
    let vlan = packet.meta().vlan;
    let vlan_hlen = if vlan.is_some() { VLAN_HLEN } else { 0 };
    let vnet_hdr_sz = if flags.contains(TunFlags::VNET_HDR) {
        device.vnet_hdr_sz()
    } else {
        0
    };
    let mut total = packet.len() + vlan_hlen + vnet_hdr_sz;
    let mut out = Sink::new(sink);

    if !flags.contains(TunFlags::NO_PI) {
        if out.room() < PI_LEN {
            return Err(TunError::InvalidArgument("buffer shorter than the packet information"));
        }
        total += PI_LEN;
        let mut pi = PiHeader {
            flags: 0,
            proto: packet.meta().protocol,
        };
        if out.room() < total {
            pi.flags |= PiHeader::TUN_PKT_STRIP;
        }
        out.put(&pi.to_bytes());
    }

    if vnet_hdr_sz > 0 {
        if out.room() < vnet_hdr_sz {
            return Err(TunError::InvalidArgument("buffer shorter than the offload header"));
        }
        let hdr = match VnetHdr::from_meta(packet.meta(), packet.linear_len(), vlan_hlen) {
            Ok(hdr) => hdr,
            Err(err) => {
                if device.log_allowed() {
                    error!(device = %device.name(), %err, meta = ?packet.meta(), "cannot describe packet to user space");
                }
                return Err(err.into());
            }
        };
        out.put(&hdr.to_bytes(device.vnet_endian()));
        out.zero(vnet_hdr_sz - VNET_HDR_LEN);
    }

    let mut offset = 0;
    if let Some(tag) = vlan {
        let head = VLAN_OFFSET.min(packet.len());
        out.put_packet(packet, 0, head);
        out.put(&tag.to_bytes());
        offset = head;
    }
    out.put_packet(packet, offset, packet.len() - offset);

    device.counters().tx(packet.len() + vlan_hlen);
    Ok(out.pos)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sink_truncates() {
        let mut buf = [0xaau8; 6];
        let mut sink = Sink::new(&mut buf);
        sink.put(b"abcd");
        sink.zero(1);
        sink.put(b"xyz");
        assert_eq!(sink.pos, 6);
        assert_eq!(sink.room(), 0);
        assert_eq!(&buf, b"abcd\0x");
    }

    #[test]
    fn sink_copies_packet_ranges() {
        let packet = PacketBuf::from_slice(b"0123456789");
        let mut buf = [0u8; 4];
        let mut sink = Sink::new(&mut buf);
        sink.put_packet(&packet, 3, 10);
        assert_eq!(&buf, b"3456");
    }
}
