//! Linux implementations of the collaborator contracts.
//!
//! `EvdevSource` speaks the evdev ioctl surface and record stream of a
//! `/dev/input/eventN` node; `UinputDeviceFactory` instantiates virtual
//! devices through `/dev/uinput`.

mod evdev;
mod uinput;

pub use evdev::EvdevSource;
pub use uinput::UinputDeviceFactory;

pub(crate) const IOC_WRITE: u64 = 1;
pub(crate) const IOC_READ: u64 = 2;

/// Builds an ioctl request number, `_IOC(dir, type, nr, size)`.
pub(crate) const fn ioc(dir: u64, ty: u8, nr: u64, size: u64) -> u64 {
    (dir << 30) | ((size & 0x3fff) << 16) | ((ty as u64) << 8) | nr
}

/// Kernel `struct input_event`, bit-for-bit.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct input_event {
    pub time: libc::timeval,
    pub type_: u16,
    pub code: u16,
    pub value: i32,
}

/// Kernel `struct input_id`, bit-for-bit.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct input_id {
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

/// Kernel `struct input_absinfo`, bit-for-bit.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct input_absinfo {
    pub value: i32,
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}
