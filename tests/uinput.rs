//! Virtual device creation and synthetic event injection through a
//! recording factory.

mod common;

use common::{key_model, mt_model, shared, MockSource, MockUinputFactory};

use evsync::{
    AxisInfo, CodeData, Device, DeviceProperty, Error, EventCode, EventType, InputEvent,
    StreamPhase,
};

#[test]
fn clone_replays_capabilities_into_factory() {
    let model = shared(mt_model());
    let original = Device::from_source(Box::new(MockSource(model))).unwrap();

    let mut factory = MockUinputFactory::default();
    let clone = original.create_uinput_device_with(&mut factory).unwrap();

    let created = factory.created.lock().unwrap();
    let created = created.as_ref().unwrap();
    assert_eq!(created.name(), "scripted touchpad");
    assert!(created.has_event(EventCode::ABS_MT_POSITION_X));
    assert_eq!(
        created.axis_info(EventCode::ABS_X).unwrap().maximum,
        Some(4095)
    );

    assert_eq!(clone.stream_phase(), StreamPhase::Detached);
    assert_eq!(clone.devnode().unwrap().to_str(), Some("/dev/input/event99"));
    assert!(clone.syspath().is_some());
}

#[test]
fn clone_carries_repeat_settings_and_properties() {
    let model = shared(key_model());
    let mut original = Device::from_source(Box::new(MockSource(model))).unwrap();
    original.enable_property(DeviceProperty::Direct);

    let mut factory = MockUinputFactory::default();
    original.create_uinput_device_with(&mut factory).unwrap();

    let created = factory.created.lock().unwrap();
    let created = created.as_ref().unwrap();
    assert!(created.has_property(DeviceProperty::Direct));
    assert_eq!(created.value(EventCode::REP_DELAY), Some(250));
    assert_eq!(created.value(EventCode::REP_PERIOD), Some(33));
}

#[test]
fn hand_built_device_can_be_instantiated() {
    let mut device = Device::new();
    device.set_name("synthetic mouse");
    device.enable(EventCode::BTN_LEFT, None).unwrap();
    device.enable(EventCode::REL_X, None).unwrap();
    device.enable(EventCode::REL_Y, None).unwrap();
    device
        .enable(
            EventCode::ABS_X,
            Some(CodeData::Abs(AxisInfo::with_range(0, 1023))),
        )
        .unwrap();

    let mut factory = MockUinputFactory::default();
    let clone = device.create_uinput_device_with(&mut factory).unwrap();

    let created = factory.created.lock().unwrap();
    let created = created.as_ref().unwrap();
    assert!(created.has_event(EventType::Relative));
    assert!(created.has_event(EventCode::BTN_LEFT));
    assert_eq!(
        created.axis_info(EventCode::ABS_X).unwrap().maximum,
        Some(1023)
    );
    drop(created);

    assert!(clone.raw_fd().is_none());
}

#[test]
fn send_events_writes_records_in_order() {
    let mut device = Device::new();
    device.enable(EventCode::REL_X, None).unwrap();

    let mut factory = MockUinputFactory::default();
    let written = factory.written.clone();
    let mut clone = device.create_uinput_device_with(&mut factory).unwrap();

    clone
        .send_events(&[
            InputEvent::new(EventCode::REL_X, -3),
            InputEvent::new(EventCode::SYN_REPORT, 0),
        ])
        .unwrap();

    let written = written.lock().unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].event_type, 0x02);
    assert_eq!(written[0].code, 0x00);
    assert_eq!(written[0].value, -3);
    assert_eq!(written[1].event_type, 0x00);
}

#[test]
fn send_events_requires_a_created_device() {
    let model = shared(key_model());
    let mut original = Device::from_source(Box::new(MockSource(model))).unwrap();
    let err = original
        .send_events(&[InputEvent::new(EventCode::KEY_A, 1)])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidFile));
}
