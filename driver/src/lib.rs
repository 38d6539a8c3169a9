// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Virtual point-to-point (tun) and ethernet (tap) interfaces.
//!
//! A [`Driver`] owns named [`Device`]s.  User space talks to a device through [`Handle`]s: each
//! bound handle holds one queue of the device, writes packets into the networking stack and
//! reads the packets the stack transmits through its queue.
//!
//! - [`registry`]: device creation, binding and teardown.
//! - [`queue`]: the queue slot table and attach/detach.
//! - [`device`]: queue selection and the transmit path.
//! - [`marshal`]: moving packets between user buffers and [`PacketBuf`]s.
//! - [`filter`]: the destination MAC filter of tap devices.
//! - [`control`]: the control requests made through a bound handle.
//!
//! The networking stack, the access policy and the program runtimes are collaborators behind
//! the traits in [`stack`] and [`prog`].
//!
//! [`PacketBuf`]: net::packet::PacketBuf

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod filter;
pub mod handle;
pub mod marshal;
pub mod prog;
pub mod queue;
pub mod registry;
pub mod stack;
mod sync;

pub use config::{
    DeviceConfig, DeviceConfigBuilder, DeviceKind, DriverConfig, DriverConfigBuilder,
    NetdevFeatures, OffloadFlags, PollFlags, TunFlags,
};
pub use device::{Device, XmitVerdict};
pub use error::TunError;
pub use handle::{Handle, HandleState};
pub use marshal::rx::WriteOptions;
pub use prog::{FilterLoader, FilterProgram, SocketFilter, SteeringProgram, XdpAction, XdpProgram};
pub use registry::Driver;
pub use stack::{AccessGate, Credentials, NetStack, RecordingStack};
