//! Event and axis calibration records.

use serde::{Deserialize, Serialize};

use crate::codes::EventCode;

/// One observed or synthesized input event.
///
/// The value's interpretation depends on the code: 0/1/2 for keys
/// (release/press/repeat), a signed magnitude for axes, opaque for
/// synchronization markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub code: EventCode,
    pub value: i32,
    /// Timestamp seconds, from the device clock.
    pub sec: i64,
    /// Timestamp microseconds.
    pub usec: i64,
}

impl InputEvent {
    /// An event with a zero timestamp; the kernel fills in its own time when
    /// the event is written to a uinput device.
    pub const fn new(code: EventCode, value: i32) -> InputEvent {
        InputEvent {
            code,
            value,
            sec: 0,
            usec: 0,
        }
    }

    pub const fn timestamped(code: EventCode, value: i32, sec: i64, usec: i64) -> InputEvent {
        InputEvent {
            code,
            value,
            sec,
            usec,
        }
    }
}

/// Calibration data for one absolute axis, mirroring `struct input_absinfo`.
///
/// Every field is optional: `None` means "leave unchanged" when writing and
/// "unknown" when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisInfo {
    pub minimum: Option<i32>,
    pub maximum: Option<i32>,
    pub fuzz: Option<i32>,
    pub flat: Option<i32>,
    pub resolution: Option<i32>,
    pub value: Option<i32>,
}

impl AxisInfo {
    /// A range-only calibration, the common case when building devices by hand.
    pub const fn with_range(minimum: i32, maximum: i32) -> AxisInfo {
        AxisInfo {
            minimum: Some(minimum),
            maximum: Some(maximum),
            fuzz: None,
            flat: None,
            resolution: None,
            value: None,
        }
    }

    /// Overwrites only the fields that are set in `other`.
    pub fn merge_from(&mut self, other: &AxisInfo) {
        if other.minimum.is_some() {
            self.minimum = other.minimum;
        }
        if other.maximum.is_some() {
            self.maximum = other.maximum;
        }
        if other.fuzz.is_some() {
            self.fuzz = other.fuzz;
        }
        if other.flat.is_some() {
            self.flat = other.flat;
        }
        if other.resolution.is_some() {
            self.resolution = other.resolution;
        }
        if other.value.is_some() {
            self.value = other.value;
        }
    }

    /// The same record with every unset field pinned to zero, which is what
    /// the kernel stores for axes enabled without full calibration.
    pub fn zero_filled(&self) -> AxisInfo {
        AxisInfo {
            minimum: Some(self.minimum.unwrap_or(0)),
            maximum: Some(self.maximum.unwrap_or(0)),
            fuzz: Some(self.fuzz.unwrap_or(0)),
            flat: Some(self.flat.unwrap_or(0)),
            resolution: Some(self.resolution.unwrap_or(0)),
            value: Some(self.value.unwrap_or(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_touches_only_set_fields() {
        let mut info = AxisInfo {
            minimum: Some(0),
            maximum: Some(100),
            fuzz: Some(2),
            flat: None,
            resolution: Some(33),
            value: Some(7),
        };
        info.merge_from(&AxisInfo {
            resolution: Some(72),
            ..AxisInfo::default()
        });
        assert_eq!(info.resolution, Some(72));
        assert_eq!(info.minimum, Some(0));
        assert_eq!(info.maximum, Some(100));
        assert_eq!(info.fuzz, Some(2));
        assert_eq!(info.flat, None);
        assert_eq!(info.value, Some(7));
    }

    #[test]
    fn zero_filled_defaults() {
        let info = AxisInfo::with_range(-5, 5).zero_filled();
        assert_eq!(info.minimum, Some(-5));
        assert_eq!(info.maximum, Some(5));
        assert_eq!(info.fuzz, Some(0));
        assert_eq!(info.resolution, Some(0));
        assert_eq!(info.value, Some(0));
    }
}
