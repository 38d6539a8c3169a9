// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Programmable hooks.
//!
//! The driver never interprets filter byte code.  It stores programs and runs them through
//! these traits, acting on the verdict.

use crate::error::TunError;
use net::packet::PacketBuf;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// Verdict of a fast-path program run on a written packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XdpAction {
    /// Continue to the stack.
    Pass,
    /// Discard the packet.
    Drop,
    /// Hand the packet to the stack's redirect target.
    Redirect,
    /// Bounce the packet back out of the device.
    Tx,
    /// The program failed; discard and count an exception.
    Aborted,
}

/// Fast-path program run on packets written by user space.
///
/// The program may rewrite or shorten the packet in place.
pub trait XdpProgram: Debug + Send + Sync {
    /// Run the program.
    fn run(&self, packet: &mut PacketBuf) -> XdpAction;
}

/// Filter run on packets on their way to user space.
pub trait SocketFilter: Debug + Send + Sync {
    /// Number of bytes of `packet` to keep; zero drops the packet.
    fn run(&self, packet: &PacketBuf) -> usize;
}

/// Program choosing the queue of a transmitted packet.
pub trait SteeringProgram: Debug + Send + Sync {
    /// An arbitrary value, reduced modulo the number of active queues.
    fn run(&self, packet: &PacketBuf) -> u32;
}

/// Opaque classic filter byte code, as stored by the device and returned on query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterProgram(pub Arc<[u8]>);

impl From<&[u8]> for FilterProgram {
    fn from(code: &[u8]) -> Self {
        FilterProgram(Arc::from(code))
    }
}

/// Turns stored byte code into a runnable [`SocketFilter`].
pub trait FilterLoader: Debug + Send + Sync {
    /// Load `program`.
    ///
    /// # Errors
    ///
    /// Returns [`TunError::FilterAttachFailed`] if the program can not be loaded.
    fn load(&self, program: &FilterProgram) -> Result<Arc<dyn SocketFilter>, TunError>;
}

/// A loader which accepts every program and filters nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllLoader;

#[derive(Debug)]
struct AcceptAll;

impl SocketFilter for AcceptAll {
    fn run(&self, packet: &PacketBuf) -> usize {
        packet.len()
    }
}

impl FilterLoader for AcceptAllLoader {
    fn load(&self, _: &FilterProgram) -> Result<Arc<dyn SocketFilter>, TunError> {
        Ok(Arc::new(AcceptAll))
    }
}
