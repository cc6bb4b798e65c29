//! Collaborator contracts: the byte-record codec over a device node, and the
//! virtual device factory.
//!
//! The core never issues a syscall itself; everything it needs from the
//! kernel goes through these traits. The `sys` module provides the Linux
//! implementations; tests substitute scripted mocks.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::state::{DeviceId, DeviceState};

/// One decoded kernel input event record, field-for-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub sec: i64,
    pub usec: i64,
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
}

/// Kernel-side axis calibration, field-for-field `struct input_absinfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawAbsInfo {
    pub value: i32,
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

impl From<RawAbsInfo> for crate::event::AxisInfo {
    fn from(raw: RawAbsInfo) -> Self {
        crate::event::AxisInfo {
            minimum: Some(raw.minimum),
            maximum: Some(raw.maximum),
            fuzz: Some(raw.fuzz),
            flat: Some(raw.flat),
            resolution: Some(raw.resolution),
            value: Some(raw.value),
        }
    }
}

impl From<crate::event::AxisInfo> for RawAbsInfo {
    fn from(info: crate::event::AxisInfo) -> Self {
        RawAbsInfo {
            value: info.value.unwrap_or(0),
            minimum: info.minimum.unwrap_or(0),
            maximum: info.maximum.unwrap_or(0),
            fuzz: info.fuzz.unwrap_or(0),
            flat: info.flat.unwrap_or(0),
            resolution: info.resolution.unwrap_or(0),
        }
    }
}

/// Read modes for the record stream.
///
/// `Normal` and `Blocking` pull fresh records from the device node; `Sync`
/// drains the synthesized resynchronization queue and `ForceSync` rebuilds
/// that queue from kernel state first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFlag {
    Normal,
    Blocking,
    Sync,
    ForceSync,
}

/// A kernel input device node plus the record codec over it.
///
/// Implementations decode the fixed-layout `struct input_event` records and
/// answer the ioctl-style capability and state queries the synchronizer
/// needs. All calls are single attempts; nothing here retries.
pub trait EventSource {
    fn name(&self) -> io::Result<String>;
    fn phys(&self) -> io::Result<Option<String>>;
    fn uniq(&self) -> io::Result<Option<String>>;
    fn input_id(&self) -> io::Result<DeviceId>;
    fn driver_version(&self) -> io::Result<i32>;

    /// Raw numbers of the event types the device advertises.
    fn type_bits(&self) -> io::Result<Vec<u16>>;
    /// Raw numbers of the codes advertised for one event type.
    fn code_bits(&self, event_type: u16) -> io::Result<Vec<u16>>;
    /// Raw numbers of the advertised `INPUT_PROP_*` bits.
    fn property_bits(&self) -> io::Result<Vec<u16>>;

    fn absinfo(&self, code: u16) -> io::Result<RawAbsInfo>;
    /// Persists new calibration to the live kernel device. Permanent beyond
    /// this process; requires privilege.
    fn set_absinfo(&mut self, code: u16, info: &RawAbsInfo) -> io::Result<()>;

    /// Raw numbers of the keys currently held down.
    fn key_state(&self) -> io::Result<Vec<u16>>;
    /// Raw numbers of the switches currently on.
    fn switch_state(&self) -> io::Result<Vec<u16>>;
    /// Raw numbers of the LEDs currently lit.
    fn led_state(&self) -> io::Result<Vec<u16>>;
    /// Per-slot values of one `ABS_MT_*` code, `num_slots` entries.
    fn slot_values(&self, code: u16, num_slots: usize) -> io::Result<Vec<i32>>;
    /// Auto-repeat (delay, period) settings, `None` where unsupported.
    fn repeat_state(&self) -> io::Result<Option<(i32, i32)>> {
        Ok(None)
    }

    /// Requests or releases exclusive event delivery.
    fn grab(&mut self, grab: bool) -> io::Result<()>;
    /// Switches event timestamps to the monotonic clock.
    fn set_clock_monotonic(&mut self) -> io::Result<()>;

    /// Whether reads on the node suspend the caller until data arrives.
    fn is_blocking(&self) -> io::Result<bool>;
    /// The numeric descriptor, usable for readiness polling.
    fn raw_fd(&self) -> i32;

    /// Decodes the next pending record. `Ok(None)` means no record is
    /// available right now; in blocking mode the call suspends instead.
    fn next_record(&mut self, blocking: bool) -> io::Result<Option<RawRecord>>;

    /// The current time of the clock the device stamps events with. Used for
    /// synthesized resynchronization events.
    fn now(&self) -> (i64, i64) {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        (elapsed.as_secs() as i64, elapsed.subsec_micros() as i64)
    }
}

/// Writes synthetic event records into a created virtual device.
pub trait UinputWriter {
    fn write_record(&mut self, record: &RawRecord) -> io::Result<()>;
}

/// A live kernel-visible virtual device, as handed back by the factory.
pub struct UinputHandle {
    pub writer: Box<dyn UinputWriter>,
    /// The `/dev/input/eventN` node, if it could be resolved.
    pub devnode: Option<PathBuf>,
    /// The device's sysfs directory, if it could be resolved.
    pub syspath: Option<PathBuf>,
}

impl UinputHandle {
    pub fn devnode(&self) -> Option<&Path> {
        self.devnode.as_deref()
    }

    pub fn syspath(&self) -> Option<&Path> {
        self.syspath.as_deref()
    }
}

impl std::fmt::Debug for UinputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UinputHandle")
            .field("devnode", &self.devnode)
            .field("syspath", &self.syspath)
            .finish_non_exhaustive()
    }
}

/// Instantiates a kernel-visible virtual device from a capability snapshot.
pub trait UinputFactory {
    fn create(&mut self, state: &DeviceState) -> io::Result<UinputHandle>;
}
