//! The in-memory mirror of a device: identity, capabilities, calibration,
//! current values and multi-touch slot state.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::codes::{DeviceProperty, EvBit, EventCode, EventType};
use crate::error::{Error, Result};
use crate::event::{AxisInfo, InputEvent};

/// Bus/vendor/product/version identifiers, mirroring `struct input_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceId {
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

/// Code-specific data required when enabling certain event codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeData {
    /// Calibration for an `EV_ABS` code. Unset fields become zero.
    Abs(AxisInfo),
    /// The value of an `EV_REP` code (delay or period, in milliseconds).
    Repeat(i32),
}

/// A device's mutable state mirror.
///
/// Created empty for hand-built devices or populated from a kernel handle at
/// attach time. Mutated by the explicit setters here and implicitly by the
/// event stream as records are consumed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceState {
    name: String,
    phys: Option<String>,
    uniq: Option<String>,
    id: DeviceId,
    driver_version: i32,
    /// Enabled codes per enabled type. A type with an empty set is still
    /// enabled as a type.
    codes: BTreeMap<EventType, BTreeSet<u16>>,
    /// Calibration for enabled absolute axes. Retains stale entries after a
    /// disable; the read path is gated by `codes`.
    #[serde(with = "code_keyed")]
    axes: HashMap<EventCode, AxisInfo>,
    /// Last known value per key/axis code. Absent means "never reported",
    /// which reads as zero for enabled codes.
    #[serde(with = "code_keyed")]
    values: HashMap<EventCode, i32>,
    properties: BTreeSet<DeviceProperty>,
    /// Per-slot value maps, keyed by `ABS_MT_*` code number. Present only on
    /// multi-touch devices.
    slots: Option<Vec<HashMap<u16, i32>>>,
    current_slot: usize,
}

impl DeviceState {
    pub fn new() -> DeviceState {
        DeviceState::default()
    }

    // Identity.

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn phys(&self) -> Option<&str> {
        self.phys.as_deref()
    }

    pub fn set_phys(&mut self, phys: impl Into<String>) {
        self.phys = Some(phys.into());
    }

    pub fn uniq(&self) -> Option<&str> {
        self.uniq.as_deref()
    }

    pub fn set_uniq(&mut self, uniq: impl Into<String>) {
        self.uniq = Some(uniq.into());
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn set_id(&mut self, id: DeviceId) {
        self.id = id;
    }

    pub fn driver_version(&self) -> i32 {
        self.driver_version
    }

    pub(crate) fn set_driver_version(&mut self, version: i32) {
        self.driver_version = version;
    }

    // Capability model.

    /// Whether the type (and, for a code, the code itself) is enabled.
    ///
    /// A code is enabled only while its parent type is: disabling a type
    /// makes all its codes unreachable here even though their stored values
    /// persist.
    pub fn has_event(&self, bit: impl Into<EvBit>) -> bool {
        match bit.into() {
            EvBit::Type(ty) => self.codes.contains_key(&ty),
            EvBit::Code(code) => self
                .codes
                .get(&code.kind)
                .is_some_and(|set| set.contains(&code.code)),
        }
    }

    pub fn has_property(&self, prop: DeviceProperty) -> bool {
        self.properties.contains(&prop)
    }

    /// Enables an event type or code.
    ///
    /// Enabling a code implicitly enables its type. `EV_ABS` codes require
    /// [`CodeData::Abs`], `EV_REP` codes require [`CodeData::Repeat`], and
    /// everything else must come without data.
    pub fn enable(&mut self, bit: impl Into<EvBit>, data: Option<CodeData>) -> Result<()> {
        match bit.into() {
            EvBit::Type(ty) => {
                self.codes.entry(ty).or_default();
                Ok(())
            }
            EvBit::Code(code) => {
                match (code.kind, data) {
                    (EventType::Absolute, Some(CodeData::Abs(info))) => {
                        self.axes.insert(code, info.zero_filled());
                        if code == EventCode::ABS_MT_SLOT {
                            self.init_slots(&info);
                        }
                    }
                    (EventType::Absolute, _) => {
                        return Err(Error::InvalidArgument(
                            "enabling an EV_ABS code requires axis calibration data",
                        ));
                    }
                    (EventType::Repeat, Some(CodeData::Repeat(value))) => {
                        self.values.insert(code, value);
                    }
                    (EventType::Repeat, _) => {
                        return Err(Error::InvalidArgument(
                            "enabling an EV_REP code requires a repeat value",
                        ));
                    }
                    (_, Some(_)) => {
                        return Err(Error::InvalidArgument(
                            "event code does not take enable data",
                        ));
                    }
                    (_, None) => {}
                }
                self.codes.entry(code.kind).or_default().insert(code.code);
                Ok(())
            }
        }
    }

    pub fn enable_property(&mut self, prop: DeviceProperty) {
        self.properties.insert(prop);
    }

    /// Disables an event type or code. Disabling a type cascades to all its
    /// codes on the read path; stored values and calibration stay behind in
    /// case the capability is re-enabled.
    pub fn disable(&mut self, bit: impl Into<EvBit>) {
        match bit.into() {
            EvBit::Type(ty) => {
                self.codes.remove(&ty);
            }
            EvBit::Code(code) => {
                if let Some(set) = self.codes.get_mut(&code.kind) {
                    set.remove(&code.code);
                }
            }
        }
    }

    /// All enabled types with their enabled codes, in kernel numeric order.
    pub fn evbits(&self) -> BTreeMap<EventType, Vec<EventCode>> {
        self.codes
            .iter()
            .map(|(&ty, set)| (ty, set.iter().map(|&c| ty.code(c)).collect()))
            .collect()
    }

    /// All enabled device properties.
    pub fn properties(&self) -> Vec<DeviceProperty> {
        self.properties.iter().copied().collect()
    }

    pub(crate) fn enabled_codes(&self, ty: EventType) -> impl Iterator<Item = EventCode> + '_ {
        self.codes
            .get(&ty)
            .into_iter()
            .flat_map(move |set| set.iter().map(move |&c| ty.code(c)))
    }

    // Axis calibration.

    /// The stored calibration for an enabled absolute axis.
    pub fn axis_info(&self, code: EventCode) -> Option<AxisInfo> {
        if code.kind != EventType::Absolute || !self.has_event(code) {
            return None;
        }
        self.axes.get(&code).copied()
    }

    /// Merges the set fields of `new_values` into the stored calibration.
    pub(crate) fn merge_axis_info(&mut self, code: EventCode, new_values: &AxisInfo) -> Result<()> {
        if code.kind != EventType::Absolute || !self.has_event(code) {
            return Err(Error::InvalidArgument(
                "code is not an absolute axis on this device",
            ));
        }
        self.axes.entry(code).or_default().merge_from(new_values);
        Ok(())
    }

    // Current values.

    /// The current value of a code, or `None` for bare types and codes the
    /// device does not support. Enabled codes that never reported read as 0;
    /// absolute axes fall back to their calibration value.
    pub fn value(&self, bit: impl Into<EvBit>) -> Option<i32> {
        match bit.into() {
            EvBit::Type(_) => None,
            EvBit::Code(code) => {
                if !self.has_event(code) {
                    return None;
                }
                self.values
                    .get(&code)
                    .copied()
                    .or_else(|| self.axes.get(&code).and_then(|a| a.value))
                    .or(Some(0))
            }
        }
    }

    /// Sets the current value of a code. Values attach to codes, never to
    /// bare types.
    pub fn set_value(&mut self, bit: impl Into<EvBit>, value: i32) -> Result<()> {
        match bit.into() {
            EvBit::Type(_) => Err(Error::InvalidArgument(
                "cannot assign a value to a bare event type",
            )),
            EvBit::Code(code) => {
                if !self.has_event(code) {
                    return Err(Error::InvalidArgument(
                        "code is not enabled on this device",
                    ));
                }
                self.store_value(code, value);
                Ok(())
            }
        }
    }

    // Multi-touch slots.

    /// The number of multi-touch slots, or `None` for single-touch devices.
    pub fn num_slots(&self) -> Option<usize> {
        self.slots.as_ref().map(Vec::len)
    }

    /// The currently selected slot. `None` when the device has no slots.
    pub fn current_slot(&self) -> Option<usize> {
        self.slots.as_ref().map(|_| self.current_slot)
    }

    fn check_slot_args(&self, slot: usize, code: EventCode) -> Result<usize> {
        let num_slots = self
            .num_slots()
            .ok_or(Error::InvalidArgument("device has no multi-touch slots"))?;
        if slot >= num_slots {
            return Err(Error::InvalidArgument("slot index out of range"));
        }
        if !code.is_mt_axis() {
            return Err(Error::InvalidArgument("code is not a per-slot axis"));
        }
        Ok(slot)
    }

    /// The value of a per-slot axis in the given slot.
    pub fn slot_value(&self, slot: usize, code: EventCode) -> Result<Option<i32>> {
        let slot = self.check_slot_args(slot, code)?;
        if !self.has_event(code) {
            return Ok(None);
        }
        let slots = self.slots.as_ref().expect("checked by check_slot_args");
        Ok(Some(slots[slot].get(&code.code).copied().unwrap_or(0)))
    }

    pub fn set_slot_value(&mut self, slot: usize, code: EventCode, value: i32) -> Result<()> {
        let slot = self.check_slot_args(slot, code)?;
        if !self.has_event(code) {
            return Err(Error::InvalidArgument(
                "code is not enabled on this device",
            ));
        }
        let slots = self.slots.as_mut().expect("checked by check_slot_args");
        slots[slot].insert(code.code, value);
        Ok(())
    }

    pub(crate) fn set_slot_value_unchecked(&mut self, slot: usize, code: u16, value: i32) {
        if let Some(slots) = self.slots.as_mut() {
            if let Some(map) = slots.get_mut(slot) {
                map.insert(code, value);
            }
        }
    }

    pub(crate) fn select_slot(&mut self, slot: usize) {
        if let Some(slots) = self.slots.as_ref() {
            if slot < slots.len() {
                self.current_slot = slot;
            }
        }
    }

    fn init_slots(&mut self, info: &AxisInfo) {
        let num = info.maximum.unwrap_or(0).max(0) as usize + 1;
        self.slots = Some(vec![HashMap::new(); num]);
        self.current_slot = (info.value.unwrap_or(0).max(0) as usize).min(num - 1);
    }

    // Event stream application.

    fn store_value(&mut self, code: EventCode, value: i32) {
        if code.is_mt_axis() && self.slots.is_some() {
            let slot = self.current_slot;
            self.set_slot_value_unchecked(slot, code.code, value);
            return;
        }
        self.values.insert(code, value);
        if code.kind == EventType::Absolute {
            if let Some(axis) = self.axes.get_mut(&code) {
                axis.value = Some(value);
            }
        }
    }

    /// Applies one streamed event to the mirror. Relative motion and
    /// synchronization markers carry no persistent state.
    pub(crate) fn apply_event(&mut self, event: &InputEvent) {
        match event.code.kind {
            EventType::Synchronization | EventType::Relative => {}
            EventType::Absolute if event.code == EventCode::ABS_MT_SLOT => {
                self.select_slot(event.value.max(0) as usize);
                self.store_value(event.code, event.value);
            }
            _ => self.store_value(event.code, event.value),
        }
    }
}

/// (De)serializes an `EventCode`-keyed map as a sequence of pairs;
/// composite keys have no representation in string-keyed formats.
mod code_keyed {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::codes::EventCode;

    pub fn serialize<S, V>(map: &HashMap<EventCode, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let entries: Vec<(&EventCode, &V)> = map.iter().collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<HashMap<EventCode, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        let entries = Vec::<(EventCode, V)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mt_state(num_slots: i32) -> DeviceState {
        let mut state = DeviceState::new();
        state
            .enable(
                EventCode::ABS_MT_SLOT,
                Some(CodeData::Abs(AxisInfo::with_range(0, num_slots - 1))),
            )
            .unwrap();
        state
            .enable(
                EventCode::ABS_MT_POSITION_X,
                Some(CodeData::Abs(AxisInfo::with_range(0, 4095))),
            )
            .unwrap();
        state
    }

    #[test]
    fn enabling_code_enables_type() {
        let mut state = DeviceState::new();
        assert!(!state.has_event(EventType::Key));
        state.enable(EventCode::BTN_LEFT, None).unwrap();
        assert!(state.has_event(EventType::Key));
        assert!(state.has_event(EventCode::BTN_LEFT));
        assert!(!state.has_event(EventCode::KEY_A));
    }

    #[test]
    fn disabling_type_cascades_to_codes() {
        let mut state = DeviceState::new();
        state.enable(EventCode::KEY_A, None).unwrap();
        state.set_value(EventCode::KEY_A, 1).unwrap();
        state.disable(EventType::Key);
        assert!(!state.has_event(EventCode::KEY_A));
        assert_eq!(state.value(EventCode::KEY_A), None);
        // Stale value survives a re-enable.
        state.enable(EventCode::KEY_A, None).unwrap();
        assert_eq!(state.value(EventCode::KEY_A), Some(1));
    }

    #[test]
    fn abs_code_requires_calibration() {
        let mut state = DeviceState::new();
        assert!(matches!(
            state.enable(EventCode::ABS_X, None),
            Err(Error::InvalidArgument(_))
        ));
        state
            .enable(EventCode::ABS_X, Some(CodeData::Abs(AxisInfo::with_range(0, 10))))
            .unwrap();
        let info = state.axis_info(EventCode::ABS_X).unwrap();
        assert_eq!(info.fuzz, Some(0));
    }

    #[test]
    fn value_rejects_bare_type() {
        let mut state = DeviceState::new();
        state.enable(EventCode::KEY_A, None).unwrap();
        assert_eq!(state.value(EventType::Key), None);
        assert!(matches!(
            state.set_value(EventType::Key, 1),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn slot_value_validation() {
        let state = DeviceState::new();
        // No slots at all.
        assert!(state.slot_value(0, EventCode::ABS_MT_POSITION_X).is_err());

        let state = mt_state(2);
        assert_eq!(state.num_slots(), Some(2));
        assert!(state.slot_value(2, EventCode::ABS_MT_POSITION_X).is_err());
        // The slot selector itself is not a per-slot code.
        assert!(state.slot_value(0, EventCode::ABS_MT_SLOT).is_err());
        assert!(state.slot_value(0, EventCode::ABS_X).is_err());
        assert_eq!(
            state.slot_value(1, EventCode::ABS_MT_POSITION_X).unwrap(),
            Some(0)
        );
        // Valid per-slot code that the device does not have.
        assert_eq!(
            state.slot_value(1, EventCode::ABS_MT_POSITION_Y).unwrap(),
            None
        );
    }

    #[test]
    fn stream_application_tracks_slots() {
        let mut state = mt_state(2);
        state.apply_event(&InputEvent::new(EventCode::ABS_MT_SLOT, 1));
        assert_eq!(state.current_slot(), Some(1));
        state.apply_event(&InputEvent::new(EventCode::ABS_MT_POSITION_X, 500));
        assert_eq!(
            state.slot_value(1, EventCode::ABS_MT_POSITION_X).unwrap(),
            Some(500)
        );
        assert_eq!(
            state.slot_value(0, EventCode::ABS_MT_POSITION_X).unwrap(),
            Some(0)
        );
    }

    #[test]
    fn abs_value_falls_back_to_calibration() {
        let mut state = DeviceState::new();
        let info = AxisInfo {
            value: Some(42),
            ..AxisInfo::with_range(0, 100)
        };
        state
            .enable(EventCode::ABS_X, Some(CodeData::Abs(info)))
            .unwrap();
        assert_eq!(state.value(EventCode::ABS_X), Some(42));
        state.apply_event(&InputEvent::new(EventCode::ABS_X, 77));
        assert_eq!(state.value(EventCode::ABS_X), Some(77));
        assert_eq!(state.axis_info(EventCode::ABS_X).unwrap().value, Some(77));
    }

    #[test]
    fn snapshot_round_trips_through_serde() {
        let mut state = mt_state(2);
        state.set_name("snapshot pad");
        state.enable_property(DeviceProperty::Pointer);
        state
            .set_slot_value(1, EventCode::ABS_MT_POSITION_X, 55)
            .unwrap();
        state.apply_event(&InputEvent::new(EventCode::ABS_MT_SLOT, 1));

        let json = serde_json::to_string(&state).unwrap();
        let back: DeviceState = serde_json::from_str(&json).unwrap();

        assert_eq!(back.name(), "snapshot pad");
        assert!(back.has_property(DeviceProperty::Pointer));
        assert_eq!(back.num_slots(), Some(2));
        assert_eq!(back.current_slot(), Some(1));
        assert_eq!(
            back.slot_value(1, EventCode::ABS_MT_POSITION_X).unwrap(),
            Some(55)
        );
        assert_eq!(
            back.axis_info(EventCode::ABS_MT_POSITION_X)
                .unwrap()
                .maximum,
            Some(4095)
        );
    }
}
