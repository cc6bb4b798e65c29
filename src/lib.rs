//! Evsync - Linux Input Device Modeling and Resynchronization Library
//!
//! This library mirrors the capabilities and state of evdev input devices,
//! keeps that mirror consistent across kernel buffer overruns by
//! synthesizing catch-up event sequences after `SYN_DROPPED`, and clones
//! modeled devices into kernel-visible virtual devices through uinput.
//!
//! The core is OS-free: every kernel interaction goes through the
//! [`backend::EventSource`] and [`backend::UinputFactory`] traits, with the
//! Linux implementations living in [`sys`]. On Linux, [`Device::open`] and
//! [`Device::create_uinput_device`] wire those in for you.

pub mod backend;
pub mod codes;
pub mod device;
pub mod error;
pub mod event;
pub mod state;
mod sync;

#[cfg(feature = "tokio")]
pub mod stream;
#[cfg(target_os = "linux")]
pub mod sys;

// Re-export commonly used types
pub use backend::{
    EventSource, RawAbsInfo, RawRecord, ReadFlag, UinputFactory, UinputHandle, UinputWriter,
};
pub use codes::{DeviceProperty, EvBit, EventCode, EventType};
pub use device::{Device, Events, SyncEvents};
pub use error::{Error, Result};
pub use event::{AxisInfo, InputEvent};
pub use state::{CodeData, DeviceId, DeviceState};
pub use sync::StreamPhase;

#[cfg(feature = "tokio")]
pub use stream::EventStream;
