// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Driver errors.

use net::buffer::SourceExhausted;
use net::header::vnet::VnetHdrError;
use net::interface::IllegalInterfaceName;
use nix::errno::Errno;

/// Everything the driver can refuse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TunError {
    /// A request or packet was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The requested interface name is not legal.
    #[error(transparent)]
    InvalidName(#[from] IllegalInterfaceName),
    /// The handle already holds an active queue.
    #[error("handle is already attached")]
    AlreadyBound,
    /// The handle is not bound to a device.
    #[error("handle is not bound to a device")]
    NotBound,
    /// Every queue slot is taken.
    #[error("queue limit reached")]
    QueueLimitReached,
    /// The device is single queue and its queue is taken.
    #[error("single queue device is busy")]
    SingleQueueBusy,
    /// The caller may not perform the operation.
    #[error("permission denied")]
    PermissionDenied,
    /// A ring could not be sized as requested.
    #[error("out of memory")]
    OutOfMemory,
    /// Nothing to read and the handle does not block.
    #[error("operation would block")]
    WouldBlock,
    /// A blocking read was interrupted.
    #[error("interrupted")]
    Interrupted,
    /// The device is down or the handle was shut down.
    #[error("i/o error: {0}")]
    IoError(&'static str),
    /// The offload header does not describe the packet.
    #[error("bad frame: {0}")]
    FrameError(#[from] VnetHdrError),
    /// The device exists and exclusive creation was requested.
    #[error("device busy")]
    Busy,
    /// The device's socket filter could not be attached to the queue.
    #[error("filter attach failed: {0}")]
    FilterAttachFailed(String),
    /// The caller's buffer was shorter than it claimed.
    #[error("bad address")]
    Fault,
    /// The request does not apply to this device.
    #[error("not applicable")]
    NotApplicable,
}

impl TunError {
    /// The errno a character device front end reports for this error.
    #[must_use]
    pub fn errno(&self) -> Errno {
        match self {
            TunError::InvalidArgument(_)
            | TunError::InvalidName(_)
            | TunError::AlreadyBound
            | TunError::FrameError(_)
            | TunError::FilterAttachFailed(_) => Errno::EINVAL,
            TunError::NotBound => Errno::EBADFD,
            TunError::QueueLimitReached => Errno::E2BIG,
            TunError::SingleQueueBusy | TunError::Busy => Errno::EBUSY,
            TunError::PermissionDenied => Errno::EPERM,
            TunError::OutOfMemory => Errno::ENOMEM,
            TunError::WouldBlock => Errno::EAGAIN,
            TunError::Interrupted => Errno::EINTR,
            TunError::IoError(_) => Errno::EIO,
            TunError::Fault => Errno::EFAULT,
            TunError::NotApplicable => Errno::EOPNOTSUPP,
        }
    }
}

impl From<SourceExhausted> for TunError {
    fn from(_: SourceExhausted) -> Self {
        TunError::Fault
    }
}
