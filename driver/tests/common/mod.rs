// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![allow(dead_code)]

use driver::{Credentials, DeviceConfigBuilder, Driver, DriverConfig, Handle, RecordingStack, TunFlags};
use etherparse::PacketBuilder;
use flow_entry::ManualClock;
use std::sync::Arc;

pub const CLIENT: [u8; 4] = [192, 168, 1, 10];
pub const SERVER: [u8; 4] = [192, 168, 1, 1];
pub const CLIENT_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x0a];
pub const SERVER_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];

pub struct Harness {
    pub driver: Driver,
    pub stack: Arc<RecordingStack>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(DriverConfig {
        flow_gc: false,
        ..DriverConfig::default()
    })
}

pub fn harness_with(config: DriverConfig) -> Harness {
    let stack = Arc::new(RecordingStack::new());
    let clock = Arc::new(ManualClock::new());
    let driver = Driver::new(config, stack.clone()).with_clock(clock.clone());
    Harness {
        driver,
        stack,
        clock,
    }
}

pub fn bind(driver: &Driver, name: &str, flags: TunFlags) -> Arc<Handle> {
    let handle = driver.open(Credentials::admin());
    let config = DeviceConfigBuilder::default()
        .name(name)
        .flags(flags)
        .build()
        .unwrap();
    driver.create_or_bind(&handle, &config).unwrap();
    handle
}

/// A UDP over IPv4 packet, starting at the IP header.
pub fn udp4(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ipv4(src, dst, 64).udp(sport, dport);
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).unwrap();
    out
}

/// A UDP over IPv4 packet in an ethernet frame.
pub fn udp4_frame(
    (src_mac, src): ([u8; 6], [u8; 4]),
    (dst_mac, dst): ([u8; 6], [u8; 4]),
    sport: u16,
    dport: u16,
    payload: &[u8],
) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(src_mac, dst_mac)
        .ipv4(src, dst, 64)
        .udp(sport, dport);
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).unwrap();
    out
}
