//! The resynchronization engine.
//!
//! When the kernel drops events (buffer overflow) or the backing fd is
//! swapped, the consumer's mirror of device state diverges from the kernel's
//! authoritative state. This module rebuilds the minimal event sequence that
//! brings the mirror back in line: it fetches the kernel's key/switch/LED
//! bitmaps, axis values and multi-touch slot arrays, diffs them against the
//! mirror, and queues one event per changed value, terminated by a
//! `SYN_REPORT` marker. Multi-touch changes are grouped per slot behind an
//! `ABS_MT_SLOT` selector so that no slot is reported twice and the selected
//! slot ends up where the kernel says it is.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::io;

use tracing::{debug, trace};

use crate::backend::EventSource;
use crate::codes::{EventCode, EventType};
use crate::event::InputEvent;
use crate::state::DeviceState;

/// Where the event stream currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Normal streaming from the device node.
    Live,
    /// A synthesized catch-up sequence is being replayed.
    Resyncing,
    /// No backing handle (manual or uinput-created device).
    Detached,
}

#[derive(Debug, Default)]
pub(crate) struct SyncEngine {
    needs_sync: bool,
    queue: VecDeque<InputEvent>,
}

impl SyncEngine {
    pub(crate) fn new() -> SyncEngine {
        SyncEngine::default()
    }

    /// Flags that a `SYN_DROPPED` marker was observed and a sync is due.
    pub(crate) fn note_dropped(&mut self) {
        self.needs_sync = true;
    }

    pub(crate) fn resyncing(&self) -> bool {
        !self.queue.is_empty()
    }

    pub(crate) fn pop(&mut self) -> Option<InputEvent> {
        self.queue.pop_front()
    }

    /// Rebuilds the catch-up queue from kernel state, unless one is still
    /// being drained or no sync is due and `force` is not set.
    ///
    /// The full diff is collected before the mirror is touched: a failed
    /// kernel fetch must leave mirror and queue exactly as they were, or a
    /// retry would see a mirror that already agrees with the kernel and the
    /// missed changes would never reach the consumer.
    pub(crate) fn generate(
        &mut self,
        state: &mut DeviceState,
        source: &mut dyn EventSource,
        force: bool,
    ) -> io::Result<()> {
        if self.resyncing() {
            return Ok(());
        }
        if !force && !self.needs_sync {
            return Ok(());
        }

        let (sec, usec) = source.now();
        let mut out = Vec::new();

        if state.has_event(EventType::Key) {
            diff_bitmap(state, source.key_state()?, EventType::Key, sec, usec, &mut out);
        }
        if state.has_event(EventType::Switch) {
            diff_bitmap(
                state,
                source.switch_state()?,
                EventType::Switch,
                sec,
                usec,
                &mut out,
            );
        }
        if state.has_event(EventType::Led) {
            diff_bitmap(state, source.led_state()?, EventType::Led, sec, usec, &mut out);
        }
        if state.has_event(EventType::Absolute) {
            diff_plain_axes(state, source, sec, usec, &mut out)?;
            diff_slots(state, source, sec, usec, &mut out)?;
        }

        out.push(InputEvent::timestamped(EventCode::SYN_REPORT, 0, sec, usec));

        for event in &out {
            trace!(code = %event.code, value = event.value, "sync event");
            state.apply_event(event);
        }

        debug!(
            events = out.len(),
            forced = force,
            "generated resynchronization sequence"
        );

        self.queue = out.into();
        self.needs_sync = false;
        Ok(())
    }
}

/// Diffs a current on/off bitmap (keys, switches, LEDs) against the mirror.
fn diff_bitmap(
    state: &DeviceState,
    current: Vec<u16>,
    ty: EventType,
    sec: i64,
    usec: i64,
    out: &mut Vec<InputEvent>,
) {
    let down: HashSet<u16> = current.into_iter().collect();
    for code in state.enabled_codes(ty) {
        let now = down.contains(&code.code);
        let before = state.value(code).unwrap_or(0) != 0;
        if now != before {
            out.push(InputEvent::timestamped(code, now as i32, sec, usec));
        }
    }
}

/// Diffs non-multi-touch absolute axes via per-axis calibration reads.
fn diff_plain_axes(
    state: &DeviceState,
    source: &mut dyn EventSource,
    sec: i64,
    usec: i64,
    out: &mut Vec<InputEvent>,
) -> io::Result<()> {
    let has_slots = state.num_slots().is_some();
    let codes: Vec<EventCode> = state.enabled_codes(EventType::Absolute).collect();
    for code in codes {
        if code == EventCode::ABS_MT_SLOT || (has_slots && code.is_mt_axis()) {
            continue;
        }
        let value = source.absinfo(code.code)?.value;
        if state.value(code).unwrap_or(0) != value {
            out.push(InputEvent::timestamped(code, value, sec, usec));
        }
    }
    Ok(())
}

/// Diffs the multi-touch slot table. Changed values are grouped per slot
/// behind an `ABS_MT_SLOT` selector event; untouched slots are not reported
/// at all, and the selector is restored to the kernel's current slot.
fn diff_slots(
    state: &DeviceState,
    source: &mut dyn EventSource,
    sec: i64,
    usec: i64,
    out: &mut Vec<InputEvent>,
) -> io::Result<()> {
    let Some(num_slots) = state.num_slots() else {
        return Ok(());
    };

    let mt_codes: Vec<EventCode> = state
        .enabled_codes(EventType::Absolute)
        .filter(|c| c.is_mt_axis())
        .collect();

    let mut changed: Vec<Vec<(EventCode, i32)>> = vec![Vec::new(); num_slots];
    for code in &mt_codes {
        let values = source.slot_values(code.code, num_slots)?;
        for (slot, &value) in values.iter().enumerate().take(num_slots) {
            let before = state.slot_value(slot, *code).ok().flatten().unwrap_or(0);
            if value != before {
                changed[slot].push((*code, value));
            }
        }
    }

    let kernel_current = (source.absinfo(EventCode::ABS_MT_SLOT.code)?.value.max(0) as usize)
        .min(num_slots.saturating_sub(1));

    let mut selected = state.current_slot().unwrap_or(0);
    for (slot, entries) in changed.iter().enumerate() {
        if entries.is_empty() {
            continue;
        }
        out.push(InputEvent::timestamped(
            EventCode::ABS_MT_SLOT,
            slot as i32,
            sec,
            usec,
        ));
        selected = slot;
        for &(code, value) in entries {
            out.push(InputEvent::timestamped(code, value, sec, usec));
        }
    }

    if selected != kernel_current {
        out.push(InputEvent::timestamped(
            EventCode::ABS_MT_SLOT,
            kernel_current as i32,
            sec,
            usec,
        ));
    }
    Ok(())
}
