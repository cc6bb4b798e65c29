//! Scripted in-memory backends standing in for the kernel.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use evsync::backend::{
    EventSource, RawAbsInfo, RawRecord, UinputFactory, UinputHandle, UinputWriter,
};
use evsync::state::{DeviceId, DeviceState};

/// What the fake kernel currently believes about one device. Tests mutate
/// this behind the shared handle to simulate state changing while the
/// consumer is not looking.
#[derive(Default)]
pub struct KernelModel {
    pub name: String,
    pub phys: Option<String>,
    pub uniq: Option<String>,
    pub id: DeviceId,
    pub types: Vec<u16>,
    pub codes: HashMap<u16, Vec<u16>>,
    pub props: Vec<u16>,
    pub absinfo: HashMap<u16, RawAbsInfo>,
    pub keys_down: Vec<u16>,
    pub switches_on: Vec<u16>,
    pub leds_on: Vec<u16>,
    /// Per-code slot arrays for multi-touch devices.
    pub slots: HashMap<u16, Vec<i32>>,
    pub repeat: Option<(i32, i32)>,
    pub records: VecDeque<RawRecord>,
    pub blocking: bool,
    /// Raw OS error that grab requests should fail with, if any.
    pub grab_errno: Option<i32>,
    /// Raw OS error the next LED state fetch should fail with; consumed on
    /// first use.
    pub led_errno: Option<i32>,
    /// Every grab/ungrab request seen, in order.
    pub grab_calls: Vec<bool>,
}

pub type SharedModel = Arc<Mutex<KernelModel>>;

pub fn shared(model: KernelModel) -> SharedModel {
    Arc::new(Mutex::new(model))
}

pub fn rec(event_type: u16, code: u16, value: i32) -> RawRecord {
    RawRecord {
        sec: 1,
        usec: 0,
        event_type,
        code,
        value,
    }
}

/// A keyboard-ish model: EV_KEY with a couple of codes, EV_LED, EV_REP.
pub fn key_model() -> KernelModel {
    let mut model = KernelModel {
        name: "scripted keyboard".into(),
        phys: Some("mock/input0".into()),
        id: DeviceId {
            bustype: 0x03,
            vendor: 0x1234,
            product: 0x5678,
            version: 1,
        },
        types: vec![0x00, 0x01, 0x11, 0x14],
        repeat: Some((250, 33)),
        ..KernelModel::default()
    };
    model.codes.insert(0x00, vec![0x00, 0x03]);
    model.codes.insert(0x01, vec![30, 48, 0x110]);
    model.codes.insert(0x11, vec![0]);
    model.codes.insert(0x14, vec![0, 1]);
    model
}

/// A two-slot multi-touch model with X/Y/tracking-id per slot.
pub fn mt_model() -> KernelModel {
    let mut model = KernelModel {
        name: "scripted touchpad".into(),
        types: vec![0x00, 0x03],
        ..KernelModel::default()
    };
    model.codes.insert(0x00, vec![0x00, 0x03]);
    model.codes.insert(0x03, vec![0x00, 0x01, 0x2f, 0x35, 0x36, 0x39]);
    for (code, max) in [(0x00, 4095), (0x01, 2047), (0x35, 4095), (0x36, 2047)] {
        model.absinfo.insert(
            code,
            RawAbsInfo {
                maximum: max,
                ..RawAbsInfo::default()
            },
        );
    }
    model.absinfo.insert(
        0x2f,
        RawAbsInfo {
            maximum: 1,
            ..RawAbsInfo::default()
        },
    );
    model.absinfo.insert(
        0x39,
        RawAbsInfo {
            minimum: -1,
            maximum: 65535,
            ..RawAbsInfo::default()
        },
    );
    for code in [0x35u16, 0x36, 0x39] {
        let fill = if code == 0x39 { -1 } else { 0 };
        model.slots.insert(code, vec![fill; 2]);
    }
    model
}

pub struct MockSource(pub SharedModel);

impl EventSource for MockSource {
    fn name(&self) -> io::Result<String> {
        Ok(self.0.lock().unwrap().name.clone())
    }

    fn phys(&self) -> io::Result<Option<String>> {
        Ok(self.0.lock().unwrap().phys.clone())
    }

    fn uniq(&self) -> io::Result<Option<String>> {
        Ok(self.0.lock().unwrap().uniq.clone())
    }

    fn input_id(&self) -> io::Result<DeviceId> {
        Ok(self.0.lock().unwrap().id)
    }

    fn driver_version(&self) -> io::Result<i32> {
        Ok(0x010001)
    }

    fn type_bits(&self) -> io::Result<Vec<u16>> {
        Ok(self.0.lock().unwrap().types.clone())
    }

    fn code_bits(&self, event_type: u16) -> io::Result<Vec<u16>> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .codes
            .get(&event_type)
            .cloned()
            .unwrap_or_default())
    }

    fn property_bits(&self) -> io::Result<Vec<u16>> {
        Ok(self.0.lock().unwrap().props.clone())
    }

    fn absinfo(&self, code: u16) -> io::Result<RawAbsInfo> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .absinfo
            .get(&code)
            .copied()
            .unwrap_or_default())
    }

    fn set_absinfo(&mut self, code: u16, info: &RawAbsInfo) -> io::Result<()> {
        self.0.lock().unwrap().absinfo.insert(code, *info);
        Ok(())
    }

    fn key_state(&self) -> io::Result<Vec<u16>> {
        Ok(self.0.lock().unwrap().keys_down.clone())
    }

    fn switch_state(&self) -> io::Result<Vec<u16>> {
        Ok(self.0.lock().unwrap().switches_on.clone())
    }

    fn led_state(&self) -> io::Result<Vec<u16>> {
        let mut model = self.0.lock().unwrap();
        if let Some(errno) = model.led_errno.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        Ok(model.leds_on.clone())
    }

    fn slot_values(&self, code: u16, num_slots: usize) -> io::Result<Vec<i32>> {
        let model = self.0.lock().unwrap();
        let mut values = model.slots.get(&code).cloned().unwrap_or_default();
        values.resize(num_slots, 0);
        Ok(values)
    }

    fn repeat_state(&self) -> io::Result<Option<(i32, i32)>> {
        Ok(self.0.lock().unwrap().repeat)
    }

    fn grab(&mut self, grab: bool) -> io::Result<()> {
        let mut model = self.0.lock().unwrap();
        model.grab_calls.push(grab);
        if grab {
            if let Some(errno) = model.grab_errno {
                return Err(io::Error::from_raw_os_error(errno));
            }
        }
        Ok(())
    }

    fn set_clock_monotonic(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn is_blocking(&self) -> io::Result<bool> {
        Ok(self.0.lock().unwrap().blocking)
    }

    fn raw_fd(&self) -> i32 {
        42
    }

    fn next_record(&mut self, _blocking: bool) -> io::Result<Option<RawRecord>> {
        Ok(self.0.lock().unwrap().records.pop_front())
    }

    fn now(&self) -> (i64, i64) {
        (100, 500)
    }
}

/// Records what a factory was asked to build and what was written into the
/// resulting device.
#[derive(Default)]
pub struct MockUinputFactory {
    pub created: Arc<Mutex<Option<DeviceState>>>,
    pub written: Arc<Mutex<Vec<RawRecord>>>,
}

struct MockWriter(Arc<Mutex<Vec<RawRecord>>>);

impl UinputWriter for MockWriter {
    fn write_record(&mut self, record: &RawRecord) -> io::Result<()> {
        self.0.lock().unwrap().push(*record);
        Ok(())
    }
}

impl UinputFactory for MockUinputFactory {
    fn create(&mut self, state: &DeviceState) -> io::Result<UinputHandle> {
        *self.created.lock().unwrap() = Some(state.clone());
        Ok(UinputHandle {
            writer: Box::new(MockWriter(self.written.clone())),
            devnode: Some("/dev/input/event99".into()),
            syspath: Some("/sys/devices/virtual/input/input99".into()),
        })
    }
}
