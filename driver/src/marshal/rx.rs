// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The write path: user bytes to a packet for the stack.

use super::{
    GOODCOPY_LEN, NET_IP_ALIGN, SKB_SHARED_INFO, TUN_RX_PAD, XDP_PACKET_HEADROOM, data_align,
};
use crate::config::{DeviceKind, TunFlags};
use crate::device::Device;
use crate::error::TunError;
use crate::handle::Handle;
use bytes::{Buf, Bytes};
use net::PAGE_SIZE;
use net::buffer::{Append, ByteSource};
use net::eth::ethtype::EthType;
use net::eth::{ETH_HLEN, EthHeader};
use net::header::pi::{PI_LEN, PiHeader};
use net::header::vnet::{VNET_HDR_LEN, VnetHdr};
use net::packet::{MAX_FRAGS, PacketBuf, ZeroCopyCompletion, ZeroCopyStatus};
use std::sync::Arc;
use tracing::{debug, trace};

/// Smallest ethertype; lower values are 802.3 lengths.
const ETH_P_802_3_MIN: u16 = 0x0600;
/// Raw 802.3 frame (novell style, starts with `0xffff`).
const ETH_P_802_3: u16 = 0x0001;
/// 802.2 LLC frame.
const ETH_P_802_2: u16 = 0x0004;

/// Options of a single write.
#[derive(Debug, Default)]
pub struct WriteOptions {
    /// Fail rather than wait (only affects the choice of build strategy here).
    pub nonblocking: bool,
    /// More packets follow immediately; they may be handed to the stack together.
    pub more: bool,
    /// Completion to fire once the user memory is no longer referenced.  Setting it allows
    /// the packet to reference the written segments instead of copying them.
    pub zerocopy: Option<ZeroCopyCompletion>,
}

/// Where the bytes of the packet went.
enum Built {
    /// Single allocation; the fast-path program already ran if it could.
    Inline { packet: PacketBuf, xdp_ran: bool },
    /// Linear area plus fragments.
    Generic { packet: PacketBuf, zerocopy: bool },
    /// The fast-path program took the packet.
    Consumed,
}

/// Turn one user write into a packet and hand it to the stack.
///
/// Returns the length of `from` on success.  Packets consumed by a fast-path program count as
/// success.
///
/// # Errors
///
/// [`TunError::InvalidArgument`] for malformed or short headers, [`TunError::FrameError`] if
/// the offload header does not fit the packet, [`TunError::IoError`] if the device is down and
/// [`TunError::OutOfMemory`] if the packet could not be built.
pub fn submit(
    device: &Arc<Device>,
    handle: &Handle,
    mut from: ByteSource,
    options: WriteOptions,
) -> Result<usize, TunError> {
    let WriteOptions {
        nonblocking,
        more,
        zerocopy: completion,
    } = options;
    let total_len = from.len();
    let mut len = total_len;
    let flags = device.flags();

    let mut pi = PiHeader {
        flags: 0,
        proto: EthType::IPV4.to_u16(),
    };
    if !flags.contains(TunFlags::NO_PI) {
        if len < PI_LEN {
            return Err(TunError::InvalidArgument("shorter than the packet information"));
        }
        let mut raw = [0u8; PI_LEN];
        from.read_exact(&mut raw)?;
        pi = PiHeader::parse(&raw);
        len -= PI_LEN;
    }

    let mut gso = VnetHdr::default();
    if flags.contains(TunFlags::VNET_HDR) {
        let sz = device.vnet_hdr_sz();
        if len < sz {
            return Err(TunError::InvalidArgument("shorter than the offload header"));
        }
        len -= sz;
        let mut raw = [0u8; VNET_HDR_LEN];
        from.read_exact(&mut raw)?;
        gso = VnetHdr::parse(&raw, device.vnet_endian()).clamped();
        if usize::from(gso.hdr_len) > len {
            return Err(TunError::InvalidArgument("offload header length exceeds the packet"));
        }
        from.skip(sz - VNET_HDR_LEN)?;
    }

    let mut align = device.headroom();
    if device.kind() == DeviceKind::Tap {
        align += NET_IP_ALIGN;
        if len < ETH_HLEN || (gso.hdr_len != 0 && usize::from(gso.hdr_len) < ETH_HLEN) {
            return Err(TunError::InvalidArgument("shorter than an ethernet header"));
        }
    }

    let good_linear = PAGE_SIZE.saturating_sub(align + SKB_SHARED_INFO);
    let mut zerocopy = false;
    let mut copylen = len;
    if completion.is_some() {
        copylen = if gso.hdr_len == 0 {
            GOODCOPY_LEN
        } else {
            usize::from(gso.hdr_len)
        }
        .min(good_linear)
        .min(len);
        let mut rest = from.clone();
        rest.advance(copylen);
        zerocopy = rest.npages(len - copylen, MAX_FRAGS) <= MAX_FRAGS;
        if !zerocopy {
            copylen = len;
        }
    }

    let built = if can_build_inline(device, handle, len, nonblocking, zerocopy) {
        build_inline(device, handle, &mut from, len, &gso)?
    } else {
        let linear = if zerocopy {
            copylen
        } else {
            usize::from(gso.hdr_len).min(good_linear)
        };
        build_generic(device, &mut from, align, len, copylen, linear, zerocopy)?
    };
    let (mut packet, xdp_ran, zerocopy) = match built {
        Built::Inline { packet, xdp_ran } => (packet, xdp_ran, false),
        Built::Generic { packet, zerocopy } => (packet, false, zerocopy),
        Built::Consumed => {
            if let Some(completion) = completion {
                completion.complete(ZeroCopyStatus::Copied);
            }
            return Ok(total_len);
        }
    };

    let built_len = packet.len();
    if let Err(err) = gso.apply(packet.meta_mut(), built_len) {
        debug!(device = %device.name(), %err, "bad offload header");
        device.counters().rx_frame_errors();
        return Err(err.into());
    }

    let protocol = match device.kind() {
        DeviceKind::Tun if flags.contains(TunFlags::NO_PI) => {
            let mut first = [0u8; 1];
            let version = if packet.copy_out(0, &mut first) == 1 {
                first[0] >> 4
            } else {
                0
            };
            if let Some(ethertype) = EthType::from_ip_version(version) {
                ethertype.to_u16()
            } else {
                device.counters().rx_dropped();
                return Err(TunError::InvalidArgument("not an ip packet"));
            }
        }
        DeviceKind::Tun => pi.proto,
        DeviceKind::Tap => ethernet_protocol(&packet),
    };
    packet.meta_mut().protocol = protocol;

    if let Some(mut completion) = completion {
        if zerocopy {
            completion.mark_zerocopy();
            packet.attach_zerocopy(Arc::new(completion));
        } else {
            completion.complete(ZeroCopyStatus::Copied);
        }
    }

    let queue = handle.queue_index();
    packet.meta_mut().rx_queue = Some(queue);

    if !xdp_ran {
        if let Some(program) = device.xdp_program() {
            match device.run_xdp(program.as_ref(), packet, queue) {
                Some(passed) => packet = passed,
                None => return Ok(total_len),
            }
        }
    }

    let rxhash = if device.steering_program().is_none()
        && device.queues().active() > 1
        && !handle.is_detached()
    {
        packet.flow_hash(device.link())
    } else {
        None
    };

    if !device.is_up() {
        device.counters().rx_dropped();
        return Err(TunError::IoError("device is down"));
    }

    let len = packet.len();
    deliver_batched(device, handle, packet, more);
    device.counters().rx(len);
    if let Some(hash) = rxhash {
        device.update_flow(handle, hash);
    }
    trace!(device = %device.name(), queue, len, "packet handed to the stack");
    Ok(total_len)
}

/// A single allocation is enough for small ethernet frames written by a non-blocking writer
/// without a send buffer limit.
fn can_build_inline(
    device: &Device,
    handle: &Handle,
    len: usize,
    nonblocking: bool,
    zerocopy: bool,
) -> bool {
    device.kind() == DeviceKind::Tap
        && !device.flags().contains(TunFlags::NAPI_FRAGS)
        && handle.sndbuf_unlimited()
        && nonblocking
        && !zerocopy
        && data_align(len + TUN_RX_PAD + XDP_PACKET_HEADROOM) + data_align(SKB_SHARED_INFO)
            <= PAGE_SIZE
}

fn build_inline(
    device: &Device,
    handle: &Handle,
    from: &mut ByteSource,
    len: usize,
    gso: &VnetHdr,
) -> Result<Built, TunError> {
    let program = device.xdp_program();
    let pad = if program.is_some() {
        TUN_RX_PAD + XDP_PACKET_HEADROOM
    } else {
        TUN_RX_PAD
    };
    let mut packet = PacketBuf::new(pad, len);
    let linear = packet.append(len).map_err(|_| TunError::OutOfMemory)?;
    if let Err(err) = from.read_exact(linear) {
        device.counters().rx_dropped();
        return Err(err.into());
    }
    match program {
        Some(program) if gso.gso_type == 0 => {
            match device.run_xdp(program.as_ref(), packet, handle.queue_index()) {
                Some(packet) => Ok(Built::Inline {
                    packet,
                    xdp_ran: true,
                }),
                None => Ok(Built::Consumed),
            }
        }
        _ => Ok(Built::Inline {
            packet,
            xdp_ran: false,
        }),
    }
}

/// Copy the first `copylen` bytes (at least `linear` of them into the linear area) and either
/// reference the rest (`zerocopy`) or copy it into page sized fragments.
fn build_generic(
    device: &Device,
    from: &mut ByteSource,
    align: usize,
    len: usize,
    copylen: usize,
    linear: usize,
    zerocopy: bool,
) -> Result<Built, TunError> {
    let linear = if align + copylen < PAGE_SIZE || linear == 0 {
        copylen
    } else {
        linear
    };
    // nothing left to reference
    let zerocopy = zerocopy && linear < len;
    let mut packet = PacketBuf::new(align, linear);
    let copied = fill(&mut packet, from, len, linear, zerocopy);
    if let Err(err) = copied {
        device.counters().rx_dropped();
        return Err(err);
    }
    Ok(Built::Generic { packet, zerocopy })
}

fn fill(
    packet: &mut PacketBuf,
    from: &mut ByteSource,
    len: usize,
    linear: usize,
    zerocopy: bool,
) -> Result<(), TunError> {
    let head = packet.append(linear).map_err(|_| TunError::OutOfMemory)?;
    from.read_exact(head)?;
    let rest = len - linear;
    if rest == 0 {
        return Ok(());
    }
    if zerocopy {
        for segment in from.split_segments(rest)? {
            packet.push_frag(segment).map_err(|_| TunError::OutOfMemory)?;
        }
        return Ok(());
    }
    let chunk = PAGE_SIZE.max(rest.div_ceil(MAX_FRAGS));
    let mut left = rest;
    while left > 0 {
        let n = chunk.min(left);
        let mut page = vec![0u8; n];
        from.read_exact(&mut page)?;
        packet
            .push_frag(Bytes::from(page))
            .map_err(|_| TunError::OutOfMemory)?;
        left -= n;
    }
    Ok(())
}

/// The protocol of an ethernet frame, the way the link layer classifies it.
fn ethernet_protocol(packet: &PacketBuf) -> u16 {
    let mut head = [0u8; ETH_HLEN + 2];
    let copied = packet.copy_out(0, &mut head);
    let Some(eth) = EthHeader::new(&head[..copied]) else {
        return ETH_P_802_2;
    };
    let ethertype = eth.ether_type_raw();
    if ethertype >= ETH_P_802_3_MIN {
        ethertype
    } else if copied == head.len() && head[ETH_HLEN..] == [0xff, 0xff] {
        ETH_P_802_3
    } else {
        ETH_P_802_2
    }
}

/// Hand `packet` to the stack, possibly holding it back to deliver together with the next
/// writes of the same handle.
///
/// A held batch never exceeds the device's `rx_batched` packets; it is flushed once full or
/// on the first write without `more`.
fn deliver_batched(device: &Device, handle: &Handle, packet: PacketBuf, more: bool) {
    let limit = device.rx_batched() as usize;
    let queue = handle.queue_index();
    let stack = device.stack();
    if limit == 0 {
        stack.receive(packet, queue);
        return;
    }
    let mut batch = handle.batch.lock();
    if !more && batch.is_empty() {
        drop(batch);
        stack.receive(packet, queue);
        return;
    }
    batch.push(packet);
    if !more || batch.len() >= limit {
        let pending = std::mem::take(&mut *batch);
        drop(batch);
        for held in pending {
            stack.receive(held, queue);
        }
    }
}
