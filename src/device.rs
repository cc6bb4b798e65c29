//! The unified device handle.
//!
//! A [`Device`] mirrors one kernel input device (or describes a device built
//! by hand), streams and classifies its events, resynchronizes after kernel
//! buffer overflows, and can be cloned into a kernel-visible virtual device
//! for synthetic event injection.

use tracing::{debug, trace, warn};

use crate::backend::{EventSource, RawRecord, ReadFlag, UinputFactory, UinputHandle};
use crate::codes::{DeviceProperty, EvBit, EventCode, EventType};
use crate::error::{Error, Result};
use crate::event::{AxisInfo, InputEvent};
use crate::state::{CodeData, DeviceId, DeviceState};
use crate::sync::{StreamPhase, SyncEngine};

use std::collections::BTreeMap;
use std::path::Path;

/// An evdev device, real or constructed.
///
/// With a backing [`EventSource`] the device mirrors a node under
/// `/dev/input` and can stream events; without one it is a capability
/// description that can still be turned into a uinput device.
///
/// Not internally synchronized: one logical device, one thread at a time.
pub struct Device {
    state: DeviceState,
    source: Option<Box<dyn EventSource>>,
    uinput: Option<UinputHandle>,
    grabbed: bool,
    engine: SyncEngine,
}

impl Device {
    /// An empty, handle-less device for manual construction.
    pub fn new() -> Device {
        Device {
            state: DeviceState::new(),
            source: None,
            uinput: None,
            grabbed: false,
            engine: SyncEngine::new(),
        }
    }

    /// Attaches to a device node, switching it to the monotonic clock and
    /// populating identity, capabilities, calibration and the current
    /// key/switch/LED/slot baseline from the kernel.
    pub fn from_source(mut source: Box<dyn EventSource>) -> Result<Device> {
        source.set_clock_monotonic()?;

        let mut state = DeviceState::new();
        state.set_name(source.name()?);
        if let Some(phys) = source.phys()? {
            state.set_phys(phys);
        }
        if let Some(uniq) = source.uniq()? {
            state.set_uniq(uniq);
        }
        state.set_id(source.input_id()?);
        state.set_driver_version(source.driver_version()?);

        for type_raw in source.type_bits()? {
            let Some(ty) = EventType::from_raw(type_raw) else {
                trace!(type_raw, "skipping unknown event type");
                continue;
            };
            state.enable(ty, None)?;
            for code_raw in source.code_bits(type_raw)? {
                let code = ty.code(code_raw);
                let data = match ty {
                    EventType::Absolute => {
                        Some(CodeData::Abs(source.absinfo(code_raw)?.into()))
                    }
                    EventType::Repeat => Some(CodeData::Repeat(0)),
                    _ => None,
                };
                state.enable(code, data)?;
            }
        }

        for prop_raw in source.property_bits()? {
            let Some(prop) = DeviceProperty::from_raw(prop_raw) else {
                trace!(prop_raw, "skipping unknown device property");
                continue;
            };
            state.enable_property(prop);
        }

        if let Some((delay, period)) = source.repeat_state()? {
            let _ = state.set_value(EventCode::REP_DELAY, delay);
            let _ = state.set_value(EventCode::REP_PERIOD, period);
        }

        for code_raw in source.key_state()? {
            let _ = state.set_value(EventType::Key.code(code_raw), 1);
        }
        for code_raw in source.switch_state()? {
            let _ = state.set_value(EventType::Switch.code(code_raw), 1);
        }
        for code_raw in source.led_state()? {
            let _ = state.set_value(EventType::Led.code(code_raw), 1);
        }

        if let Some(num_slots) = state.num_slots() {
            let mt_codes: Vec<u16> = state
                .enabled_codes(EventType::Absolute)
                .filter(|c| c.is_mt_axis())
                .map(|c| c.code)
                .collect();
            for code in mt_codes {
                let values = source.slot_values(code, num_slots)?;
                for (slot, &value) in values.iter().enumerate().take(num_slots) {
                    state.set_slot_value_unchecked(slot, code, value);
                }
            }
        }

        debug!(name = state.name(), "attached to device");

        Ok(Device {
            state,
            source: Some(source),
            uinput: None,
            grabbed: false,
            engine: SyncEngine::new(),
        })
    }

    /// Opens and attaches to a device node path like `/dev/input/event0`.
    #[cfg(target_os = "linux")]
    pub fn open(path: impl AsRef<Path>) -> Result<Device> {
        let source = crate::sys::EvdevSource::open(path.as_ref())?;
        Device::from_source(Box::new(source))
    }

    // Identity.

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.state.set_name(name);
    }

    pub fn phys(&self) -> Option<&str> {
        self.state.phys()
    }

    pub fn set_phys(&mut self, phys: impl Into<String>) {
        self.state.set_phys(phys);
    }

    pub fn uniq(&self) -> Option<&str> {
        self.state.uniq()
    }

    pub fn set_uniq(&mut self, uniq: impl Into<String>) {
        self.state.set_uniq(uniq);
    }

    pub fn id(&self) -> DeviceId {
        self.state.id()
    }

    pub fn set_id(&mut self, id: DeviceId) {
        self.state.set_id(id);
    }

    pub fn driver_version(&self) -> i32 {
        self.state.driver_version()
    }

    /// The underlying state mirror.
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// The backing descriptor, if the device has a handle.
    pub fn raw_fd(&self) -> Option<i32> {
        self.source.as_ref().map(|s| s.raw_fd())
    }

    // Capability model.

    pub fn has_event(&self, bit: impl Into<EvBit>) -> bool {
        self.state.has_event(bit)
    }

    pub fn has_property(&self, prop: DeviceProperty) -> bool {
        self.state.has_property(prop)
    }

    pub fn enable(&mut self, bit: impl Into<EvBit>, data: Option<CodeData>) -> Result<()> {
        self.state.enable(bit, data)
    }

    pub fn enable_property(&mut self, prop: DeviceProperty) {
        self.state.enable_property(prop);
    }

    pub fn disable(&mut self, bit: impl Into<EvBit>) {
        self.state.disable(bit);
    }

    pub fn evbits(&self) -> BTreeMap<EventType, Vec<EventCode>> {
        self.state.evbits()
    }

    pub fn properties(&self) -> Vec<DeviceProperty> {
        self.state.properties()
    }

    pub fn num_slots(&self) -> Option<usize> {
        self.state.num_slots()
    }

    pub fn current_slot(&self) -> Option<usize> {
        self.state.current_slot()
    }

    // State accessors.

    /// Reads, and optionally rewrites, the calibration of an absolute axis.
    ///
    /// With `new_values`, only its set fields are merged into the stored
    /// record; unset fields are untouched. `kernel` additionally persists
    /// the merged calibration to the live kernel device — permanent beyond
    /// this process and rarely reversible — and is rejected without
    /// `new_values`, since committing a no-op is always a caller bug.
    pub fn absinfo(
        &mut self,
        code: EventCode,
        new_values: Option<&AxisInfo>,
        kernel: bool,
    ) -> Result<Option<AxisInfo>> {
        if kernel && new_values.is_none() {
            return Err(Error::InvalidArgument(
                "kernel commit requires new calibration values",
            ));
        }
        if let Some(new_values) = new_values {
            self.state.merge_axis_info(code, new_values)?;
            if kernel {
                let source = self.source.as_mut().ok_or(Error::InvalidFile)?;
                let merged = self
                    .state
                    .axis_info(code)
                    .expect("merge_axis_info verified the axis");
                source.set_absinfo(code.code, &merged.into())?;
                debug!(code = %code, "committed axis calibration to kernel");
            }
        }
        Ok(self.state.axis_info(code))
    }

    /// The current value of an event code, `None` if the device does not
    /// have it (or a bare type was passed).
    pub fn event_value(&self, bit: impl Into<EvBit>) -> Option<i32> {
        self.state.value(bit)
    }

    /// Sets the current value of an event code. Bare types are rejected;
    /// values only attach to codes.
    pub fn set_event_value(&mut self, bit: impl Into<EvBit>, value: i32) -> Result<()> {
        self.state.set_value(bit, value)
    }

    /// The value of a per-slot multi-touch axis in the given slot.
    pub fn slot_value(&self, slot: usize, code: EventCode) -> Result<Option<i32>> {
        self.state.slot_value(slot, code)
    }

    pub fn set_slot_value(&mut self, slot: usize, code: EventCode, value: i32) -> Result<()> {
        self.state.set_slot_value(slot, code, value)
    }

    // Event streaming.

    /// Where the event stream currently is.
    pub fn stream_phase(&self) -> StreamPhase {
        if self.source.is_none() {
            StreamPhase::Detached
        } else if self.engine.resyncing() {
            StreamPhase::Resyncing
        } else {
            StreamPhase::Live
        }
    }

    /// The currently pending events.
    ///
    /// Blocking mode of the handle is determined once per call: a blocking
    /// handle suspends the caller until a record arrives, a non-blocking one
    /// ends the iterator immediately when nothing is pending (re-invoke once
    /// the handle signals readiness). Detached devices yield nothing.
    ///
    /// When a `SYN_DROPPED` marker is streamed, it is yielded like any other
    /// event and the iterator then delivers [`Error::EventsDropped`] once
    /// before finishing. That error is advisory — call [`Device::sync`] to
    /// replay the state the drop swallowed, or keep reading and accept the
    /// kernel's own catch-up records.
    pub fn events(&mut self) -> Events<'_> {
        let (blocking, pending_error, finished) = match self.source.as_ref() {
            None => (false, None, true),
            Some(source) => match source.is_blocking() {
                Ok(blocking) => (blocking, None, false),
                Err(err) => (false, Some(Error::Io(err)), false),
            },
        };
        Events {
            device: self,
            blocking,
            pending_error,
            dropped_pending: false,
            finished,
        }
    }

    /// The events needed to bring a consumer's view back in line with the
    /// kernel's state, ending with a `SYN_REPORT` marker.
    ///
    /// Empty when there is nothing to sync: no backing handle, or no drop
    /// pending and `force` unset. `force` rebuilds the sequence from kernel
    /// state unconditionally — required after [`Device::set_source`], since
    /// the device cannot know what changed while unobserved. Never signals
    /// [`Error::EventsDropped`].
    pub fn sync(&mut self, force: bool) -> SyncEvents<'_> {
        SyncEvents {
            device: self,
            force,
            primed: false,
            finished: false,
        }
    }

    /// Low-level single-event read under an explicit [`ReadFlag`], the
    /// primitive both iterators are built on.
    pub fn next_event(&mut self, flag: ReadFlag) -> Result<Option<InputEvent>> {
        match flag {
            ReadFlag::Normal => self.next_live_event(false),
            ReadFlag::Blocking => self.next_live_event(true),
            ReadFlag::Sync => Ok(self.engine.pop()),
            ReadFlag::ForceSync => {
                let Device {
                    state,
                    source,
                    engine,
                    ..
                } = self;
                match source.as_mut() {
                    None => Ok(None),
                    Some(source) => {
                        engine.generate(state, source.as_mut(), true)?;
                        Ok(engine.pop())
                    }
                }
            }
        }
    }

    fn next_live_event(&mut self, blocking: bool) -> Result<Option<InputEvent>> {
        loop {
            let record = match self.source.as_mut() {
                None => return Ok(None),
                Some(source) => source.next_record(blocking)?,
            };
            let Some(record) = record else {
                return Ok(None);
            };
            let Some(code) = EventCode::classify(record.event_type, record.code) else {
                trace!(
                    event_type = record.event_type,
                    code = record.code,
                    "discarding record of unknown event type"
                );
                continue;
            };
            let event = InputEvent::timestamped(code, record.value, record.sec, record.usec);
            self.state.apply_event(&event);
            if code == EventCode::SYN_DROPPED {
                debug!("kernel dropped events, sync due");
                self.engine.note_dropped();
            }
            return Ok(Some(event));
        }
    }

    // Lifecycle.

    /// Requests exclusive event delivery. Refusal is reported as
    /// [`Error::DeviceGrabFailed`] and leaves the device ungrabbed.
    pub fn grab(&mut self) -> Result<()> {
        let source = self.source.as_mut().ok_or(Error::InvalidFile)?;
        source.grab(true).map_err(Error::DeviceGrabFailed)?;
        self.grabbed = true;
        Ok(())
    }

    /// Releases an exclusive grab, best-effort. Always clears grabbed-state.
    pub fn ungrab(&mut self) {
        if let Some(source) = self.source.as_mut() {
            if let Err(err) = source.grab(false) {
                trace!(%err, "ungrab release ignored an OS error");
            }
        }
        self.grabbed = false;
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    /// Rebinds the backing handle. Only legal on devices that had one to
    /// begin with; the caller must ensure the new handle points at the same
    /// device. Re-establishes the monotonic clock and, if grabbed, re-issues
    /// the grab — which the kernel silently ignores while the old handle is
    /// still open elsewhere, so close that one first. Capabilities are not
    /// re-read; call `sync(true)` afterwards to catch up on state.
    pub fn set_source(&mut self, mut source: Box<dyn EventSource>) -> Result<()> {
        if self.source.is_none() {
            return Err(Error::InvalidFile);
        }
        source.set_clock_monotonic()?;
        if self.grabbed {
            if let Err(err) = source.grab(true) {
                warn!(%err, "re-grab after handle rebind failed, old handle may still be open");
            }
        }
        self.source = Some(source);
        Ok(())
    }

    // Virtual device emission.

    /// Builds a new kernel-visible uinput device from this device's identity
    /// and capability set: every enabled type and code is replayed into the
    /// new device, with axis calibration for absolute axes and the current
    /// auto-repeat settings for repeat codes, plus all enabled properties.
    ///
    /// The returned device has no event source of its own; it accepts
    /// [`Device::send_events`] and reports [`Device::devnode`] /
    /// [`Device::syspath`]. Creation refusal (e.g. missing privilege)
    /// propagates as the underlying OS error.
    pub fn create_uinput_device_with(&self, factory: &mut dyn UinputFactory) -> Result<Device> {
        let mut state = DeviceState::new();
        state.set_name(self.state.name());
        if let Some(phys) = self.state.phys() {
            state.set_phys(phys);
        }
        if let Some(uniq) = self.state.uniq() {
            state.set_uniq(uniq);
        }
        state.set_id(self.state.id());

        for (ty, codes) in self.state.evbits() {
            state.enable(ty, None)?;
            for code in codes {
                let data = match ty {
                    EventType::Absolute => Some(CodeData::Abs(
                        self.state.axis_info(code).unwrap_or_default(),
                    )),
                    EventType::Repeat => {
                        Some(CodeData::Repeat(self.state.value(code).unwrap_or(0)))
                    }
                    _ => None,
                };
                state.enable(code, data)?;
            }
        }
        for prop in self.state.properties() {
            state.enable_property(prop);
        }

        let handle = factory.create(&state)?;
        debug!(name = state.name(), devnode = ?handle.devnode, "created uinput device");

        Ok(Device {
            state,
            source: None,
            uinput: Some(handle),
            grabbed: false,
            engine: SyncEngine::new(),
        })
    }

    /// [`Device::create_uinput_device_with`] using `/dev/uinput`.
    #[cfg(target_os = "linux")]
    pub fn create_uinput_device(&self) -> Result<Device> {
        let mut factory = crate::sys::UinputDeviceFactory::new();
        self.create_uinput_device_with(&mut factory)
    }

    /// The `/dev/input` node of a created uinput device, `None` otherwise.
    pub fn devnode(&self) -> Option<&Path> {
        self.uinput.as_ref().and_then(UinputHandle::devnode)
    }

    /// The sysfs path of a created uinput device, `None` otherwise.
    pub fn syspath(&self) -> Option<&Path> {
        self.uinput.as_ref().and_then(UinputHandle::syspath)
    }

    /// Writes synthetic events, in order, through a created uinput device.
    ///
    /// Terminate every batch with a `SYN_REPORT` event: the kernel may
    /// buffer the batch indefinitely otherwise, and this library does not
    /// insert the terminator on its own.
    pub fn send_events(&mut self, events: &[InputEvent]) -> Result<()> {
        let uinput = self.uinput.as_mut().ok_or(Error::InvalidFile)?;
        for event in events {
            let record = RawRecord {
                sec: event.sec,
                usec: event.usec,
                event_type: event.code.kind.raw(),
                code: event.code.code,
                value: event.value,
            };
            uinput.writer.write_record(&record)?;
        }
        trace!(count = events.len(), "wrote synthetic events");
        Ok(())
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::new()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.state.name())
            .field("id", &self.state.id())
            .field("grabbed", &self.grabbed)
            .field("phase", &self.stream_phase())
            .finish_non_exhaustive()
    }
}

/// Iterator over currently pending live events. See [`Device::events`].
pub struct Events<'a> {
    device: &'a mut Device,
    blocking: bool,
    pending_error: Option<Error>,
    dropped_pending: bool,
    finished: bool,
}

impl Iterator for Events<'_> {
    type Item = Result<InputEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Some(err) = self.pending_error.take() {
            self.finished = true;
            return Some(Err(err));
        }
        if self.dropped_pending {
            // The drop signal must only be observable after the SYN_DROPPED
            // event itself has been delivered.
            self.dropped_pending = false;
            self.finished = true;
            return Some(Err(Error::EventsDropped));
        }
        match self.device.next_live_event(self.blocking) {
            Ok(Some(event)) => {
                if event.code == EventCode::SYN_DROPPED {
                    self.dropped_pending = true;
                }
                Some(Ok(event))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// Iterator over the synthesized catch-up sequence. See [`Device::sync`].
pub struct SyncEvents<'a> {
    device: &'a mut Device,
    force: bool,
    primed: bool,
    finished: bool,
}

impl Iterator for SyncEvents<'_> {
    type Item = Result<InputEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if !self.primed {
            self.primed = true;
            let Device {
                state,
                source,
                engine,
                ..
            } = &mut *self.device;
            match source.as_mut() {
                None => {
                    self.finished = true;
                    return None;
                }
                Some(source) => {
                    if let Err(err) = engine.generate(state, source.as_mut(), self.force) {
                        self.finished = true;
                        return Some(Err(err.into()));
                    }
                }
            }
        }
        match self.device.engine.pop() {
            Some(event) => Some(Ok(event)),
            None => {
                self.finished = true;
                None
            }
        }
    }
}
