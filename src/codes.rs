//! The event type / event code / device property registry.
//!
//! This is the process-wide, immutable table of everything the kernel input
//! subsystem can report: event types (`EV_*`), the per-type code ranges, and
//! device-level properties (`INPUT_PROP_*`). Nothing here is tied to a
//! particular device; [`crate::DeviceState`] records which subset a device
//! actually supports.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A category of input events, mirroring the kernel's `EV_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    Synchronization,
    Key,
    Relative,
    Absolute,
    Misc,
    Switch,
    Led,
    Sound,
    Repeat,
    ForceFeedback,
    Power,
    ForceFeedbackStatus,
}

impl EventType {
    /// The kernel's `EV_MAX`, the highest raw type number.
    pub const MAX_RAW: u16 = 0x1f;

    /// Every event type, in kernel numeric order.
    pub const ALL: [EventType; 12] = [
        EventType::Synchronization,
        EventType::Key,
        EventType::Relative,
        EventType::Absolute,
        EventType::Misc,
        EventType::Switch,
        EventType::Led,
        EventType::Sound,
        EventType::Repeat,
        EventType::ForceFeedback,
        EventType::Power,
        EventType::ForceFeedbackStatus,
    ];

    /// The kernel's numeric value for this type.
    pub const fn raw(self) -> u16 {
        match self {
            EventType::Synchronization => 0x00,
            EventType::Key => 0x01,
            EventType::Relative => 0x02,
            EventType::Absolute => 0x03,
            EventType::Misc => 0x04,
            EventType::Switch => 0x05,
            EventType::Led => 0x11,
            EventType::Sound => 0x12,
            EventType::Repeat => 0x14,
            EventType::ForceFeedback => 0x15,
            EventType::Power => 0x16,
            EventType::ForceFeedbackStatus => 0x17,
        }
    }

    pub const fn from_raw(raw: u16) -> Option<EventType> {
        Some(match raw {
            0x00 => EventType::Synchronization,
            0x01 => EventType::Key,
            0x02 => EventType::Relative,
            0x03 => EventType::Absolute,
            0x04 => EventType::Misc,
            0x05 => EventType::Switch,
            0x11 => EventType::Led,
            0x12 => EventType::Sound,
            0x14 => EventType::Repeat,
            0x15 => EventType::ForceFeedback,
            0x16 => EventType::Power,
            0x17 => EventType::ForceFeedbackStatus,
            _ => return None,
        })
    }

    /// The highest valid code within this type (`*_MAX` in the kernel headers).
    pub const fn max_code(self) -> u16 {
        match self {
            EventType::Synchronization => 0x0f,
            EventType::Key => 0x2ff,
            EventType::Relative => 0x0f,
            EventType::Absolute => 0x3f,
            EventType::Misc => 0x07,
            EventType::Switch => 0x10,
            EventType::Led => 0x0f,
            EventType::Sound => 0x07,
            EventType::Repeat => 0x01,
            EventType::ForceFeedback => 0x7f,
            EventType::Power => 0x00,
            EventType::ForceFeedbackStatus => 0x01,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            EventType::Synchronization => "EV_SYN",
            EventType::Key => "EV_KEY",
            EventType::Relative => "EV_REL",
            EventType::Absolute => "EV_ABS",
            EventType::Misc => "EV_MSC",
            EventType::Switch => "EV_SW",
            EventType::Led => "EV_LED",
            EventType::Sound => "EV_SND",
            EventType::Repeat => "EV_REP",
            EventType::ForceFeedback => "EV_FF",
            EventType::Power => "EV_PWR",
            EventType::ForceFeedbackStatus => "EV_FF_STATUS",
        }
    }

    /// Builds the [`EventCode`] for a code number within this type.
    pub const fn code(self, code: u16) -> EventCode {
        EventCode { kind: self, code }
    }

    /// Iterates over every possible code of this type, in numeric order.
    pub fn codes(self) -> impl Iterator<Item = EventCode> {
        (0..=self.max_code()).map(move |c| self.code(c))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A (type, code) pair identifying one kind of event, e.g. `EV_KEY`/`BTN_LEFT`.
///
/// Used as the map key throughout the library. Codes are not restricted to
/// the names known at compile time; any numeric code within a known type is
/// representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventCode {
    pub kind: EventType,
    pub code: u16,
}

impl EventCode {
    pub const SYN_REPORT: EventCode = EventType::Synchronization.code(0x00);
    pub const SYN_DROPPED: EventCode = EventType::Synchronization.code(0x03);
    pub const SYN_MT_REPORT: EventCode = EventType::Synchronization.code(0x02);

    pub const KEY_A: EventCode = EventType::Key.code(30);
    pub const KEY_B: EventCode = EventType::Key.code(48);
    pub const BTN_LEFT: EventCode = EventType::Key.code(0x110);
    pub const BTN_TOUCH: EventCode = EventType::Key.code(0x14a);

    pub const REL_X: EventCode = EventType::Relative.code(0x00);
    pub const REL_Y: EventCode = EventType::Relative.code(0x01);

    pub const ABS_X: EventCode = EventType::Absolute.code(0x00);
    pub const ABS_Y: EventCode = EventType::Absolute.code(0x01);
    pub const ABS_MT_SLOT: EventCode = EventType::Absolute.code(0x2f);
    pub const ABS_MT_POSITION_X: EventCode = EventType::Absolute.code(0x35);
    pub const ABS_MT_POSITION_Y: EventCode = EventType::Absolute.code(0x36);
    pub const ABS_MT_TRACKING_ID: EventCode = EventType::Absolute.code(0x39);
    /// Highest multi-touch axis code (`ABS_MT_TOOL_Y`).
    pub const ABS_MT_LAST: EventCode = EventType::Absolute.code(0x3d);

    pub const REP_DELAY: EventCode = EventType::Repeat.code(0x00);
    pub const REP_PERIOD: EventCode = EventType::Repeat.code(0x01);

    pub const fn new(kind: EventType, code: u16) -> EventCode {
        EventCode { kind, code }
    }

    /// Classifies a raw (type, code) pair from the wire. Returns `None` for
    /// event types this library does not know about.
    pub const fn classify(event_type: u16, code: u16) -> Option<EventCode> {
        match EventType::from_raw(event_type) {
            Some(kind) => Some(EventCode { kind, code }),
            None => None,
        }
    }

    /// Whether this is a per-slot multi-touch axis, i.e. an `EV_ABS` code
    /// strictly between `ABS_MT_SLOT` and `ABS_MT_TOOL_Y` inclusive.
    pub const fn is_mt_axis(self) -> bool {
        matches!(self.kind, EventType::Absolute)
            && self.code > Self::ABS_MT_SLOT.code
            && self.code <= Self::ABS_MT_LAST.code
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.name(), self.code)
    }
}

/// Either an event type or a specific event code.
///
/// Capability operations accept both; this replaces attribute probing on the
/// argument with explicit case handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvBit {
    Type(EventType),
    Code(EventCode),
}

impl EvBit {
    pub const fn kind(self) -> EventType {
        match self {
            EvBit::Type(t) => t,
            EvBit::Code(c) => c.kind,
        }
    }
}

impl From<EventType> for EvBit {
    fn from(value: EventType) -> Self {
        EvBit::Type(value)
    }
}

impl From<EventCode> for EvBit {
    fn from(value: EventCode) -> Self {
        EvBit::Code(value)
    }
}

impl fmt::Display for EvBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvBit::Type(t) => t.fmt(f),
            EvBit::Code(c) => c.fmt(f),
        }
    }
}

/// Device-level flags, mirroring the kernel's `INPUT_PROP_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceProperty {
    Pointer,
    Direct,
    ButtonPad,
    SemiMt,
    TopButtonPad,
    PointingStick,
    Accelerometer,
}

impl DeviceProperty {
    pub const ALL: [DeviceProperty; 7] = [
        DeviceProperty::Pointer,
        DeviceProperty::Direct,
        DeviceProperty::ButtonPad,
        DeviceProperty::SemiMt,
        DeviceProperty::TopButtonPad,
        DeviceProperty::PointingStick,
        DeviceProperty::Accelerometer,
    ];

    pub const fn raw(self) -> u16 {
        match self {
            DeviceProperty::Pointer => 0x00,
            DeviceProperty::Direct => 0x01,
            DeviceProperty::ButtonPad => 0x02,
            DeviceProperty::SemiMt => 0x03,
            DeviceProperty::TopButtonPad => 0x04,
            DeviceProperty::PointingStick => 0x05,
            DeviceProperty::Accelerometer => 0x06,
        }
    }

    pub const fn from_raw(raw: u16) -> Option<DeviceProperty> {
        Some(match raw {
            0x00 => DeviceProperty::Pointer,
            0x01 => DeviceProperty::Direct,
            0x02 => DeviceProperty::ButtonPad,
            0x03 => DeviceProperty::SemiMt,
            0x04 => DeviceProperty::TopButtonPad,
            0x05 => DeviceProperty::PointingStick,
            0x06 => DeviceProperty::Accelerometer,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            DeviceProperty::Pointer => "INPUT_PROP_POINTER",
            DeviceProperty::Direct => "INPUT_PROP_DIRECT",
            DeviceProperty::ButtonPad => "INPUT_PROP_BUTTONPAD",
            DeviceProperty::SemiMt => "INPUT_PROP_SEMI_MT",
            DeviceProperty::TopButtonPad => "INPUT_PROP_TOPBUTTONPAD",
            DeviceProperty::PointingStick => "INPUT_PROP_POINTING_STICK",
            DeviceProperty::Accelerometer => "INPUT_PROP_ACCELEROMETER",
        }
    }
}

impl fmt::Display for DeviceProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
