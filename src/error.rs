//! Error taxonomy.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The operation requires a backing device handle that is absent, or a
    /// handle was assigned to a device constructed without one.
    #[error("operation requires a backing device handle")]
    InvalidFile,

    /// A malformed or out-of-range parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A grab request was refused by the OS layer. The caller does not have
    /// exclusive access but may continue using the device without it.
    #[error("device grab was refused")]
    DeviceGrabFailed(#[source] io::Error),

    /// The kernel dropped events from its buffer. Advisory: delivered once,
    /// immediately after the `SYN_DROPPED` event itself. The remedy is
    /// calling [`crate::Device::sync`]; ignoring it only widens the window
    /// of stale state.
    #[error("events were dropped by the kernel, device state needs a sync")]
    EventsDropped,

    /// An unclassified OS-level failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True for the advisory dropped-events condition, which is recoverable
    /// and does not indicate a broken handle.
    pub fn is_events_dropped(&self) -> bool {
        matches!(self, Error::EventsDropped)
    }
}
