// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

mod common;

use common::{CLIENT, CLIENT_MAC, Harness, SERVER, SERVER_MAC, bind, harness, udp4_frame};
use driver::{Handle, SteeringProgram, TunFlags, XmitVerdict};
use net::packet::PacketBuf;
use net::packet::hash::Link;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

const QUEUES: usize = 4;

fn multiqueue_tap(h: &Harness) -> Vec<Arc<Handle>> {
    let handles: Vec<_> = (0..QUEUES)
        .map(|_| {
            bind(
                &h.driver,
                "tap0",
                TunFlags::TAP | TunFlags::NO_PI | TunFlags::MULTI_QUEUE,
            )
        })
        .collect();
    handles[0].device().unwrap().set_up(true);
    handles
}

fn request(sport: u16) -> Vec<u8> {
    udp4_frame((CLIENT_MAC, CLIENT), (SERVER_MAC, SERVER), sport, 53, b"query")
}

fn reply(dport: u16) -> Vec<u8> {
    udp4_frame((SERVER_MAC, SERVER), (CLIENT_MAC, CLIENT), 53, dport, b"answer")
}

fn hash_of(frame: &[u8]) -> u32 {
    PacketBuf::from_slice(frame)
        .flow_hash(Link::Ethernet)
        .unwrap()
}

#[test]
#[traced_test]
fn replies_follow_the_writer() {
    let h = harness();
    let handles = multiqueue_tap(&h);
    let device = handles[0].device().unwrap();
    let (one, two) = (request(4001), request(4002));
    assert_ne!(hash_of(&one), hash_of(&two));

    for round in 0..100 {
        if round % 2 == 0 {
            handles[0].write(one.as_slice()).unwrap();
        } else {
            handles[1].write(two.as_slice()).unwrap();
        }
    }
    assert_eq!(h.stack.received_len(), 100);
    assert_eq!(device.flows().len(), 2);

    for _ in 0..100 {
        assert_eq!(device.select_queue(&PacketBuf::from_slice(&one)), 0);
        assert_eq!(device.select_queue(&PacketBuf::from_slice(&two)), 1);
    }

    assert_eq!(hash_of(&reply(4002)), hash_of(&two));
    assert_eq!(
        device.transmit(PacketBuf::from_slice(&reply(4002))),
        XmitVerdict::Queued
    );
    assert_eq!(handles[1].pending(), 1);
    let mut buf = [0u8; 256];
    let n = handles[1].read(&mut buf).unwrap();
    assert_eq!(&buf[..n], reply(4002).as_slice());
}

#[test]
fn idle_flows_expire() {
    let h = harness();
    let handles = multiqueue_tap(&h);
    let device = handles[0].device().unwrap();
    let frame = request(5000);
    handles[2].write(frame.as_slice()).unwrap();
    let hash = hash_of(&frame);
    assert_eq!(device.flows().lookup(hash), Some(2));

    h.clock.advance(Duration::from_secs(2));
    assert!(!device.flows().run_expired_timer());
    assert_eq!(device.flows().lookup(hash), Some(2));

    h.clock.advance(Duration::from_secs(1));
    assert!(device.flows().run_expired_timer());
    assert_eq!(device.flows().lookup(hash), None);
    assert!(device.flows().is_empty());
}

#[test]
fn traffic_keeps_flows_alive() {
    let h = harness();
    let handles = multiqueue_tap(&h);
    let device = handles[0].device().unwrap();
    let frame = request(5001);
    for _ in 0..5 {
        handles[3].write(frame.as_slice()).unwrap();
        h.clock.advance(Duration::from_secs(2));
        device.flows().run_expired_timer();
    }
    assert_eq!(device.flows().lookup(hash_of(&frame)), Some(3));
}

#[test]
fn single_queue_keeps_no_flows() {
    let h = harness();
    let handle = bind(
        &h.driver,
        "tap0",
        TunFlags::TAP | TunFlags::NO_PI | TunFlags::MULTI_QUEUE,
    );
    let device = handle.device().unwrap();
    device.set_up(true);
    handle.write(request(6000).as_slice()).unwrap();
    assert!(device.flows().is_empty());
    assert_eq!(device.select_queue(&PacketBuf::from_slice(&request(6000))), 0);
}

#[test]
fn moved_queue_relearns_its_flows() {
    let h = harness();
    let handles = multiqueue_tap(&h);
    let device = handles[0].device().unwrap();
    let last = request(7003);
    let kept = request(7000);
    handles[3].write(last.as_slice()).unwrap();
    handles[0].write(kept.as_slice()).unwrap();

    h.driver.set_queue(&handles[1], TunFlags::DETACH_QUEUE).unwrap();
    assert_eq!(device.queues().active(), 3);
    assert_eq!(handles[3].queue_index(), 1);
    assert_eq!(device.flows().lookup(hash_of(&kept)), Some(0));
    assert_eq!(device.flows().lookup(hash_of(&last)), Some(3));
    assert_eq!(
        device.transmit(PacketBuf::from_slice(&reply(7003))),
        XmitVerdict::Dropped
    );

    handles[3].write(last.as_slice()).unwrap();
    assert_eq!(device.flows().lookup(hash_of(&last)), Some(1));
    assert_eq!(
        device.transmit(PacketBuf::from_slice(&reply(7003))),
        XmitVerdict::Queued
    );
    assert_eq!(handles[3].pending(), 1);
}

#[test]
fn unknown_flows_spread_over_queues() {
    let h = harness();
    let handles = multiqueue_tap(&h);
    let device = handles[0].device().unwrap();
    let mut seen = [false; QUEUES];
    for port in 0..512 {
        let queue = device.select_queue(&PacketBuf::from_slice(&request(port)));
        seen[usize::from(queue)] = true;
    }
    assert_eq!(seen, [true; QUEUES]);
    assert!(device.flows().is_empty());
}

#[test]
fn non_ip_traffic_uses_the_recorded_queue() {
    let h = harness();
    let handles = multiqueue_tap(&h);
    let device = handles[0].device().unwrap();
    let mut arp = vec![0u8; 42];
    arp[..6].copy_from_slice(&[0xff; 6]);
    arp[12..14].copy_from_slice(&[0x08, 0x06]);
    let mut packet = PacketBuf::from_slice(&arp);
    assert_eq!(packet.flow_hash(Link::Ethernet), None);
    assert_eq!(device.select_queue(&packet), 0);
    packet.meta_mut().rx_queue = Some(6);
    assert_eq!(device.select_queue(&packet), 2);
}

#[derive(Debug)]
struct Fixed(u32);

impl SteeringProgram for Fixed {
    fn run(&self, _: &PacketBuf) -> u32 {
        self.0
    }
}

#[test]
fn steering_program_overrides_flows() {
    let h = harness();
    let handles = multiqueue_tap(&h);
    let device = handles[0].device().unwrap();
    device.set_steering_program(Some(Arc::new(Fixed(7))));

    let frame = request(8000);
    handles[0].write(frame.as_slice()).unwrap();
    assert!(device.flows().is_empty());
    assert_eq!(device.select_queue(&PacketBuf::from_slice(&frame)), 3);

    device.set_steering_program(None);
    handles[0].write(frame.as_slice()).unwrap();
    assert_eq!(device.select_queue(&PacketBuf::from_slice(&frame)), 0);
}
