//! Async event streaming over a real descriptor.
//!
//! A pipe stands in for the device node: the write end plays kernel, the
//! read end backs an `EventSource` whose records are a fixed-layout encoding
//! of `RawRecord`, so readiness and the drop protocol can be exercised on
//! the tokio reactor without hardware.
#![cfg(feature = "tokio")]

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd};
use std::time::Duration;

use evsync::backend::{EventSource, RawAbsInfo, RawRecord};
use evsync::state::DeviceId;
use evsync::{Device, Error, EventCode, EventStream};

const RECORD_LEN: usize = 24;

fn encode(record: &RawRecord) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    buf[0..8].copy_from_slice(&record.sec.to_ne_bytes());
    buf[8..16].copy_from_slice(&record.usec.to_ne_bytes());
    buf[16..18].copy_from_slice(&record.event_type.to_ne_bytes());
    buf[18..20].copy_from_slice(&record.code.to_ne_bytes());
    buf[20..24].copy_from_slice(&record.value.to_ne_bytes());
    buf
}

fn rec(event_type: u16, code: u16, value: i32) -> RawRecord {
    RawRecord {
        sec: 1,
        usec: 0,
        event_type,
        code,
        value,
    }
}

/// A keyboard-shaped source reading encoded records off a pipe.
struct PipeSource {
    read: File,
}

impl EventSource for PipeSource {
    fn name(&self) -> io::Result<String> {
        Ok("piped keyboard".into())
    }

    fn phys(&self) -> io::Result<Option<String>> {
        Ok(None)
    }

    fn uniq(&self) -> io::Result<Option<String>> {
        Ok(None)
    }

    fn input_id(&self) -> io::Result<DeviceId> {
        Ok(DeviceId::default())
    }

    fn driver_version(&self) -> io::Result<i32> {
        Ok(0x010001)
    }

    fn type_bits(&self) -> io::Result<Vec<u16>> {
        Ok(vec![0x00, 0x01])
    }

    fn code_bits(&self, event_type: u16) -> io::Result<Vec<u16>> {
        Ok(match event_type {
            0x00 => vec![0x00, 0x03],
            0x01 => vec![30, 48],
            _ => Vec::new(),
        })
    }

    fn property_bits(&self) -> io::Result<Vec<u16>> {
        Ok(Vec::new())
    }

    fn absinfo(&self, _code: u16) -> io::Result<RawAbsInfo> {
        Ok(RawAbsInfo::default())
    }

    fn set_absinfo(&mut self, _code: u16, _info: &RawAbsInfo) -> io::Result<()> {
        Ok(())
    }

    fn key_state(&self) -> io::Result<Vec<u16>> {
        Ok(Vec::new())
    }

    fn switch_state(&self) -> io::Result<Vec<u16>> {
        Ok(Vec::new())
    }

    fn led_state(&self) -> io::Result<Vec<u16>> {
        Ok(Vec::new())
    }

    fn slot_values(&self, _code: u16, num_slots: usize) -> io::Result<Vec<i32>> {
        Ok(vec![0; num_slots])
    }

    fn grab(&mut self, _grab: bool) -> io::Result<()> {
        Ok(())
    }

    fn set_clock_monotonic(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn is_blocking(&self) -> io::Result<bool> {
        Ok(false)
    }

    fn raw_fd(&self) -> i32 {
        self.read.as_raw_fd()
    }

    fn next_record(&mut self, _blocking: bool) -> io::Result<Option<RawRecord>> {
        // Pipe writes of one record are atomic, so a successful read is
        // always a whole record.
        let mut buf = [0u8; RECORD_LEN];
        match self.read.read(&mut buf) {
            Ok(n) if n == RECORD_LEN => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        }
        Ok(Some(RawRecord {
            sec: i64::from_ne_bytes(buf[0..8].try_into().unwrap()),
            usec: i64::from_ne_bytes(buf[8..16].try_into().unwrap()),
            event_type: u16::from_ne_bytes(buf[16..18].try_into().unwrap()),
            code: u16::from_ne_bytes(buf[18..20].try_into().unwrap()),
            value: i32::from_ne_bytes(buf[20..24].try_into().unwrap()),
        }))
    }
}

/// A device over the pipe's read end, plus the write end playing kernel.
fn pipe_device() -> (Device, File) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("evsync=trace")
        .try_init();

    let mut fds = [0i32; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let read = unsafe { File::from_raw_fd(fds[0]) };
    let write = unsafe { File::from_raw_fd(fds[1]) };
    let device = Device::from_source(Box::new(PipeSource { read })).unwrap();
    (device, write)
}

#[tokio::test]
async fn stream_delivers_written_events() {
    let (device, mut write) = pipe_device();
    let mut stream = EventStream::new(device).unwrap();

    write.write_all(&encode(&rec(0x01, 30, 1))).unwrap();
    write.write_all(&encode(&rec(0x00, 0x00, 0))).unwrap();

    let event = stream.next_event().await.unwrap();
    assert_eq!(event.code, EventCode::KEY_A);
    assert_eq!(event.value, 1);
    assert_eq!(
        stream.next_event().await.unwrap().code,
        EventCode::SYN_REPORT
    );

    // The mirror advanced with the stream.
    assert_eq!(stream.device().event_value(EventCode::KEY_A), Some(1));
}

#[tokio::test]
async fn stream_pends_until_data_arrives() {
    let (device, mut write) = pipe_device();
    let mut stream = EventStream::new(device).unwrap();

    // Nothing written yet: the read must park, not spin or error.
    let pending = tokio::time::timeout(Duration::from_millis(50), stream.next_event()).await;
    assert!(pending.is_err());

    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        write.write_all(&encode(&rec(0x01, 48, 1))).unwrap();
        write
    });

    let event = stream.next_event().await.unwrap();
    assert_eq!(event.code, EventCode::KEY_B);
    assert_eq!(event.value, 1);
    writer.await.unwrap();
}

#[tokio::test]
async fn stream_signals_drop_after_the_marker() {
    let (device, mut write) = pipe_device();
    let mut stream = EventStream::new(device).unwrap();

    write.write_all(&encode(&rec(0x00, 0x03, 0))).unwrap();
    assert_eq!(
        stream.next_event().await.unwrap().code,
        EventCode::SYN_DROPPED
    );
    assert!(matches!(
        stream.next_event().await,
        Err(Error::EventsDropped)
    ));

    // The advisory fires once; the stream keeps going afterwards.
    write.write_all(&encode(&rec(0x01, 30, 1))).unwrap();
    assert_eq!(stream.next_event().await.unwrap().code, EventCode::KEY_A);
}

#[tokio::test]
async fn into_device_hands_the_handle_back() {
    let (device, _write) = pipe_device();
    let stream = EventStream::new(device).unwrap();
    let device = stream.into_device();
    assert_eq!(device.name(), "piped keyboard");

    let detached = Device::new();
    assert!(matches!(
        EventStream::new(detached),
        Err(Error::InvalidFile)
    ));
}
