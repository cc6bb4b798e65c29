//! Async event streaming on tokio.
//!
//! Wraps a [`Device`] in an [`AsyncFd`] so event reads park on descriptor
//! readiness instead of spinning or blocking a worker thread. The descriptor
//! is switched to non-blocking mode when the stream is built.

use std::os::fd::{AsRawFd, RawFd};

use tokio::io::unix::AsyncFd;

use crate::backend::ReadFlag;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::event::InputEvent;

struct Inner {
    device: Device,
    fd: RawFd,
}

impl AsRawFd for Inner {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

/// An async stream of events from one device.
pub struct EventStream {
    inner: AsyncFd<Inner>,
    dropped_pending: bool,
}

impl EventStream {
    /// Registers the device's descriptor with the tokio reactor. Fails with
    /// [`Error::InvalidFile`] on a detached device.
    pub fn new(device: Device) -> Result<EventStream> {
        let fd = device.raw_fd().ok_or(Error::InvalidFile)?;
        set_nonblocking(fd)?;
        Ok(EventStream {
            inner: AsyncFd::new(Inner { device, fd })?,
            dropped_pending: false,
        })
    }

    pub fn device(&self) -> &Device {
        &self.inner.get_ref().device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.inner.get_mut().device
    }

    pub fn into_device(self) -> Device {
        self.inner.into_inner().device
    }

    /// Waits for and returns the next event.
    ///
    /// Mirrors the synchronous iterator's drop handling: a `SYN_DROPPED`
    /// marker is returned like any other event and the following call
    /// delivers [`Error::EventsDropped`] once, after which the caller should
    /// drain [`Device::sync`].
    pub async fn next_event(&mut self) -> Result<InputEvent> {
        if self.dropped_pending {
            self.dropped_pending = false;
            return Err(Error::EventsDropped);
        }
        loop {
            let mut guard = self.inner.readable_mut().await?;
            match guard.get_inner_mut().device.next_event(ReadFlag::Normal) {
                Ok(Some(event)) => {
                    if event.code == crate::codes::EventCode::SYN_DROPPED {
                        self.dropped_pending = true;
                    }
                    return Ok(event);
                }
                Ok(None) => {
                    guard.clear_ready();
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}
