//! The evdev device node backend.
//!
//! Wraps a `/dev/input/eventN` descriptor and answers every query the
//! synchronizer needs through the `EVIOCG*` ioctl family, decoding the raw
//! `struct input_event` records the kernel streams over the descriptor.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use tracing::trace;

use crate::backend::{EventSource, RawAbsInfo, RawRecord};
use crate::codes::EventType;
use crate::state::DeviceId;

use super::{input_absinfo, input_event, input_id, ioc, IOC_READ, IOC_WRITE};

const EVIOCGVERSION: u64 = ioc(IOC_READ, b'E', 0x01, 4);
const EVIOCGID: u64 = ioc(IOC_READ, b'E', 0x02, 8);
const EVIOCGREP: u64 = ioc(IOC_READ, b'E', 0x03, 8);
const EVIOCGRAB: u64 = ioc(IOC_WRITE, b'E', 0x90, 4);
const EVIOCSCLOCKID: u64 = ioc(IOC_WRITE, b'E', 0xa0, 4);

// String queries; nr + buffer length.
const EVIOCGNAME_NR: u64 = 0x06;
const EVIOCGPHYS_NR: u64 = 0x07;
const EVIOCGUNIQ_NR: u64 = 0x08;

// Bitmap queries.
const EVIOCGPROP_NR: u64 = 0x09;
const EVIOCGMTSLOTS_NR: u64 = 0x0a;
const EVIOCGKEY_NR: u64 = 0x18;
const EVIOCGLED_NR: u64 = 0x19;
const EVIOCGSW_NR: u64 = 0x1b;
const EVIOCGBIT_NR: u64 = 0x20;

// Per-axis calibration; nr offset by the axis code.
const EVIOCGABS_NR: u64 = 0x40;
const EVIOCSABS_NR: u64 = 0xc0;

/// An open evdev device node.
pub struct EvdevSource {
    file: File,
}

impl EvdevSource {
    /// Opens the node read-only. Write access is not needed; grabbing and
    /// calibration writes go through ioctls on the same descriptor.
    pub fn open(path: &Path) -> io::Result<EvdevSource> {
        let file = OpenOptions::new().read(true).open(path)?;
        trace!(path = %path.display(), fd = file.as_raw_fd(), "opened evdev node");
        Ok(EvdevSource { file })
    }

    /// Wraps an already-open descriptor, e.g. one received over a socket.
    pub fn from_file(file: File) -> EvdevSource {
        EvdevSource { file }
    }

    /// Flips the descriptor's `O_NONBLOCK` flag.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let fd = self.file.as_raw_fd();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn ioctl_buf(&self, request: u64, buf: &mut [u8]) -> io::Result<usize> {
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                request as libc::c_ulong,
                buf.as_mut_ptr(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    fn ioctl_string(&self, nr: u64) -> io::Result<Option<String>> {
        let mut buf = [0u8; 256];
        let request = ioc(IOC_READ, b'E', nr, buf.len() as u64);
        match self.ioctl_buf(request, &mut buf) {
            Ok(_) => {}
            // Nodes without a phys/uniq report ENOENT.
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => return Ok(None),
            Err(e) => return Err(e),
        }
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok(Some(String::from_utf8_lossy(&buf[..end]).into_owned()))
    }

    fn ioctl_bitmap(&self, nr: u64, max_code: u16) -> io::Result<Vec<u16>> {
        let len = max_code as usize / 8 + 1;
        let mut buf = vec![0u8; len];
        let request = ioc(IOC_READ, b'E', nr, len as u64);
        self.ioctl_buf(request, &mut buf)?;
        let mut set = Vec::new();
        for bit in 0..=max_code {
            if buf[bit as usize / 8] & (1 << (bit % 8)) != 0 {
                set.push(bit);
            }
        }
        Ok(set)
    }
}

impl AsRawFd for EvdevSource {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl EventSource for EvdevSource {
    fn name(&self) -> io::Result<String> {
        Ok(self.ioctl_string(EVIOCGNAME_NR)?.unwrap_or_default())
    }

    fn phys(&self) -> io::Result<Option<String>> {
        self.ioctl_string(EVIOCGPHYS_NR)
    }

    fn uniq(&self) -> io::Result<Option<String>> {
        self.ioctl_string(EVIOCGUNIQ_NR)
    }

    fn input_id(&self) -> io::Result<DeviceId> {
        let mut id = input_id::default();
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                EVIOCGID as libc::c_ulong,
                &mut id as *mut input_id,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(DeviceId {
            bustype: id.bustype,
            vendor: id.vendor,
            product: id.product,
            version: id.version,
        })
    }

    fn driver_version(&self) -> io::Result<i32> {
        let mut version: i32 = 0;
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                EVIOCGVERSION as libc::c_ulong,
                &mut version as *mut i32,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(version)
    }

    fn type_bits(&self) -> io::Result<Vec<u16>> {
        self.ioctl_bitmap(EVIOCGBIT_NR, EventType::MAX_RAW)
    }

    fn code_bits(&self, event_type: u16) -> io::Result<Vec<u16>> {
        let max = EventType::from_raw(event_type)
            .map(|ty| ty.max_code())
            .unwrap_or(0);
        self.ioctl_bitmap(EVIOCGBIT_NR + event_type as u64, max)
    }

    fn property_bits(&self) -> io::Result<Vec<u16>> {
        self.ioctl_bitmap(EVIOCGPROP_NR, 0x1f)
    }

    fn absinfo(&self, code: u16) -> io::Result<RawAbsInfo> {
        let mut info = input_absinfo::default();
        let request = ioc(
            IOC_READ,
            b'E',
            EVIOCGABS_NR + code as u64,
            mem::size_of::<input_absinfo>() as u64,
        );
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                request as libc::c_ulong,
                &mut info as *mut input_absinfo,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(RawAbsInfo {
            value: info.value,
            minimum: info.minimum,
            maximum: info.maximum,
            fuzz: info.fuzz,
            flat: info.flat,
            resolution: info.resolution,
        })
    }

    fn set_absinfo(&mut self, code: u16, info: &RawAbsInfo) -> io::Result<()> {
        let raw = input_absinfo {
            value: info.value,
            minimum: info.minimum,
            maximum: info.maximum,
            fuzz: info.fuzz,
            flat: info.flat,
            resolution: info.resolution,
        };
        let request = ioc(
            IOC_WRITE,
            b'E',
            EVIOCSABS_NR + code as u64,
            mem::size_of::<input_absinfo>() as u64,
        );
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                request as libc::c_ulong,
                &raw as *const input_absinfo,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn key_state(&self) -> io::Result<Vec<u16>> {
        self.ioctl_bitmap(EVIOCGKEY_NR, EventType::Key.max_code())
    }

    fn switch_state(&self) -> io::Result<Vec<u16>> {
        self.ioctl_bitmap(EVIOCGSW_NR, EventType::Switch.max_code())
    }

    fn led_state(&self) -> io::Result<Vec<u16>> {
        self.ioctl_bitmap(EVIOCGLED_NR, EventType::Led.max_code())
    }

    fn slot_values(&self, code: u16, num_slots: usize) -> io::Result<Vec<i32>> {
        // The request buffer doubles as input: word 0 names the queried code,
        // the kernel fills the remaining words with one value per slot.
        let mut buf = vec![0i32; num_slots + 1];
        buf[0] = code as i32;
        let request = ioc(
            IOC_READ,
            b'E',
            EVIOCGMTSLOTS_NR,
            (buf.len() * mem::size_of::<i32>()) as u64,
        );
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                request as libc::c_ulong,
                buf.as_mut_ptr(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        buf.remove(0);
        Ok(buf)
    }

    fn repeat_state(&self) -> io::Result<Option<(i32, i32)>> {
        let mut rep = [0i32; 2];
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                EVIOCGREP as libc::c_ulong,
                rep.as_mut_ptr(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // Devices without EV_REP reject the query.
            if err.raw_os_error() == Some(libc::EINVAL) {
                return Ok(None);
            }
            return Err(err);
        }
        Ok(Some((rep[0], rep[1])))
    }

    fn grab(&mut self, grab: bool) -> io::Result<()> {
        let arg: libc::c_ulong = if grab { 1 } else { 0 };
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), EVIOCGRAB as libc::c_ulong, arg) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_clock_monotonic(&mut self) -> io::Result<()> {
        let clock: i32 = libc::CLOCK_MONOTONIC;
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                EVIOCSCLOCKID as libc::c_ulong,
                &clock as *const i32,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn is_blocking(&self) -> io::Result<bool> {
        let flags = unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(flags & libc::O_NONBLOCK == 0)
    }

    fn raw_fd(&self) -> i32 {
        self.file.as_raw_fd()
    }

    fn next_record(&mut self, blocking: bool) -> io::Result<Option<RawRecord>> {
        let mut buf = [0u8; mem::size_of::<input_event>()];
        loop {
            match self.file.read(&mut buf) {
                Ok(n) if n == buf.len() => break,
                // EOF or a torn record; nothing usable.
                Ok(_) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !blocking {
                        return Ok(None);
                    }
                    // Descriptor is non-blocking but the caller wants to
                    // wait; park on readiness and retry.
                    let mut pfd = libc::pollfd {
                        fd: self.file.as_raw_fd(),
                        events: libc::POLLIN,
                        revents: 0,
                    };
                    let ret = unsafe { libc::poll(&mut pfd, 1, -1) };
                    if ret < 0 {
                        let err = io::Error::last_os_error();
                        if err.kind() == io::ErrorKind::Interrupted {
                            continue;
                        }
                        return Err(err);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        // Layout is guaranteed by #[repr(C)]; a byte buffer of the exact
        // size is always validly initialized for this field set.
        let ev: input_event = unsafe { mem::transmute_copy(&buf) };
        Ok(Some(RawRecord {
            sec: ev.time.tv_sec as i64,
            usec: ev.time.tv_usec as i64,
            event_type: ev.type_,
            code: ev.code,
            value: ev.value,
        }))
    }

    fn now(&self) -> (i64, i64) {
        // Matches the timestamps requested via EVIOCSCLOCKID at open.
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        (ts.tv_sec as i64, ts.tv_nsec as i64 / 1000)
    }
}
