//! The uinput virtual device backend.
//!
//! Replays a capability snapshot into `/dev/uinput`: one `UI_SET_*BIT` per
//! advertised code, `UI_ABS_SETUP` for axis calibration, then `UI_DEV_SETUP`
//! and `UI_DEV_CREATE`. The created node's sysfs name is read back with
//! `UI_GET_SYSNAME` to resolve the device paths.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::mem;
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::backend::{RawRecord, UinputFactory, UinputHandle, UinputWriter};
use crate::codes::{EventCode, EventType};
use crate::state::DeviceState;

use super::{input_absinfo, input_id, ioc, IOC_READ, IOC_WRITE};

const UI_SET_EVBIT: u64 = 0x4004_5564;
const UI_SET_KEYBIT: u64 = 0x4004_5565;
const UI_SET_RELBIT: u64 = 0x4004_5566;
const UI_SET_ABSBIT: u64 = 0x4004_5567;
const UI_SET_MSCBIT: u64 = 0x4004_5568;
const UI_SET_LEDBIT: u64 = 0x4004_5569;
const UI_SET_SNDBIT: u64 = 0x4004_556a;
const UI_SET_FFBIT: u64 = 0x4004_556b;
const UI_SET_PHYS: u64 = 0x4008_556c;
const UI_SET_SWBIT: u64 = 0x4004_556d;
const UI_SET_PROPBIT: u64 = 0x4004_556e;
const UI_DEV_SETUP: u64 = 0x405c_5503;
const UI_ABS_SETUP: u64 = 0x401c_5504;
const UI_DEV_CREATE: u64 = 0x5501;
const UI_DEV_DESTROY: u64 = 0x5502;

/// `UI_GET_SYSNAME(len)`, variable-length read.
const fn ui_get_sysname(len: u64) -> u64 {
    ioc(IOC_READ, b'U', 44, len)
}

/// Kernel `struct uinput_setup`, bit-for-bit.
#[repr(C)]
struct uinput_setup {
    id: input_id,
    name: [u8; 80],
    ff_effects_max: u32,
}

/// Kernel `struct uinput_abs_setup`, bit-for-bit.
#[repr(C)]
struct uinput_abs_setup {
    code: u16,
    _pad: u16,
    absinfo: input_absinfo,
}

fn ioctl_val(fd: i32, request: u64, value: libc::c_ulong) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(fd, request as libc::c_ulong, value) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn ioctl_ptr<T>(fd: i32, request: u64, arg: *const T) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(fd, request as libc::c_ulong, arg) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Creates virtual devices through a uinput control node.
pub struct UinputDeviceFactory {
    path: PathBuf,
}

impl UinputDeviceFactory {
    pub fn new() -> UinputDeviceFactory {
        UinputDeviceFactory {
            path: PathBuf::from("/dev/uinput"),
        }
    }

    /// Uses a non-default control node, e.g. inside a container namespace.
    pub fn with_path(path: impl Into<PathBuf>) -> UinputDeviceFactory {
        UinputDeviceFactory { path: path.into() }
    }
}

impl Default for UinputDeviceFactory {
    fn default() -> Self {
        UinputDeviceFactory::new()
    }
}

impl UinputFactory for UinputDeviceFactory {
    fn create(&mut self, state: &DeviceState) -> io::Result<UinputHandle> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let fd = file.as_raw_fd();

        for (ty, codes) in state.evbits() {
            ioctl_val(fd, UI_SET_EVBIT, ty.raw() as libc::c_ulong)?;
            let per_code = match ty {
                EventType::Key => Some(UI_SET_KEYBIT),
                EventType::Relative => Some(UI_SET_RELBIT),
                EventType::Absolute => Some(UI_SET_ABSBIT),
                EventType::Misc => Some(UI_SET_MSCBIT),
                EventType::Led => Some(UI_SET_LEDBIT),
                EventType::Sound => Some(UI_SET_SNDBIT),
                EventType::ForceFeedback => Some(UI_SET_FFBIT),
                EventType::Switch => Some(UI_SET_SWBIT),
                // EV_SYN, EV_REP, EV_PWR and EV_FF_STATUS carry no
                // per-code setup.
                _ => None,
            };
            let Some(request) = per_code else { continue };
            for code in codes {
                ioctl_val(fd, request, code.code as libc::c_ulong)?;
                if ty == EventType::Absolute {
                    let info = state.axis_info(code).unwrap_or_default();
                    let setup = uinput_abs_setup {
                        code: code.code,
                        _pad: 0,
                        absinfo: input_absinfo {
                            value: info.value.unwrap_or(0),
                            minimum: info.minimum.unwrap_or(0),
                            maximum: info.maximum.unwrap_or(0),
                            fuzz: info.fuzz.unwrap_or(0),
                            flat: info.flat.unwrap_or(0),
                            resolution: info.resolution.unwrap_or(0),
                        },
                    };
                    ioctl_ptr(fd, UI_ABS_SETUP, &setup)?;
                }
            }
        }

        for prop in state.properties() {
            ioctl_val(fd, UI_SET_PROPBIT, prop.raw() as libc::c_ulong)?;
        }

        if let Some(phys) = state.phys() {
            let phys = CString::new(phys).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "phys contains a NUL byte")
            })?;
            ioctl_ptr(fd, UI_SET_PHYS, phys.as_ptr())?;
        }

        let id = state.id();
        let mut setup = uinput_setup {
            id: input_id {
                bustype: id.bustype,
                vendor: id.vendor,
                product: id.product,
                version: id.version,
            },
            name: [0u8; 80],
            ff_effects_max: 0,
        };
        let name = state.name().as_bytes();
        let len = name.len().min(setup.name.len() - 1);
        setup.name[..len].copy_from_slice(&name[..len]);

        ioctl_ptr(fd, UI_DEV_SETUP, &setup)?;
        ioctl_val(fd, UI_DEV_CREATE, 0)?;

        let (devnode, syspath) = match sysname(fd) {
            Ok(sysname) => {
                let syspath = PathBuf::from("/sys/devices/virtual/input").join(&sysname);
                (find_devnode(&syspath), Some(syspath))
            }
            Err(e) => {
                warn!(error = %e, "could not resolve created device paths");
                (None, None)
            }
        };

        debug!(
            name = state.name(),
            devnode = ?devnode,
            "created uinput device"
        );

        let mut node = UinputNode { file };

        // The kernel keeps its own auto-repeat settings per device; push the
        // snapshot's values so the clone repeats like the original.
        if state.has_event(EventType::Repeat) {
            let delay = state.value(EventCode::REP_DELAY).unwrap_or(0);
            let period = state.value(EventCode::REP_PERIOD).unwrap_or(0);
            for (code, value) in [
                (EventCode::REP_DELAY, delay),
                (EventCode::REP_PERIOD, period),
                (EventCode::SYN_REPORT, 0),
            ] {
                node.write_record(&RawRecord {
                    sec: 0,
                    usec: 0,
                    event_type: code.kind.raw(),
                    code: code.code,
                    value,
                })?;
            }
        }

        Ok(UinputHandle {
            writer: Box::new(node),
            devnode,
            syspath,
        })
    }
}

fn sysname(fd: i32) -> io::Result<String> {
    let mut buf = [0u8; 64];
    let request = ui_get_sysname(buf.len() as u64);
    let ret = unsafe { libc::ioctl(fd, request as libc::c_ulong, buf.as_mut_ptr()) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Scans the device's sysfs directory for its `eventN` child.
fn find_devnode(syspath: &std::path::Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(syspath).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("event") {
            return Some(PathBuf::from("/dev/input").join(name.as_ref()));
        }
    }
    None
}

/// The open control node of one created device. Destroys the device when
/// dropped.
struct UinputNode {
    file: File,
}

impl UinputWriter for UinputNode {
    fn write_record(&mut self, record: &RawRecord) -> io::Result<()> {
        let ev = super::input_event {
            time: libc::timeval {
                tv_sec: record.sec as libc::time_t,
                tv_usec: record.usec as libc::suseconds_t,
            },
            type_: record.event_type,
            code: record.code,
            value: record.value,
        };
        let bytes = unsafe {
            std::slice::from_raw_parts(
                &ev as *const super::input_event as *const u8,
                mem::size_of::<super::input_event>(),
            )
        };
        self.file.write_all(bytes)
    }
}

impl Drop for UinputNode {
    fn drop(&mut self) {
        let _ = ioctl_val(self.file.as_raw_fd(), UI_DEV_DESTROY, 0);
    }
}
