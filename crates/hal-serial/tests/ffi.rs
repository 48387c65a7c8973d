//! Tests for the C interface
//!
//! The C functions share one process-wide registry, so every test installs
//! its own loopback registry and runs serially.

use hal_serial::ffi::*;
use hal_serial::port::{ErrorKind, LineSettings, LoopbackOpener, PortId, Registry};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::os::raw::c_char;
use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

const ONBOARD: i32 = PortId::Onboard as i32;
const MXP: i32 = PortId::Mxp as i32;

fn install_loopback() -> LoopbackOpener {
    let opener = LoopbackOpener::new();
    let defaults = LineSettings {
        timeout: Duration::from_millis(30),
        ..LineSettings::default()
    };
    install_registry(Registry::with_defaults(opener.clone(), defaults));
    opener
}

fn code(kind: ErrorKind) -> i32 {
    kind.status_code()
}

#[test]
#[serial]
fn test_initialize_and_close_status() {
    install_loopback();
    let mut status = 1;

    unsafe {
        HAL_InitializeSerialPort(ONBOARD, &mut status);
        assert_eq!(status, 0);

        HAL_InitializeSerialPort(ONBOARD, &mut status);
        assert_eq!(status, code(ErrorKind::AlreadyOpen));

        HAL_CloseSerial(ONBOARD, &mut status);
        assert_eq!(status, 0);

        HAL_CloseSerial(ONBOARD, &mut status);
        assert_eq!(status, code(ErrorKind::NotOpen));
    }
    take_registry();
}

#[test]
#[serial]
fn test_invalid_port_status() {
    install_loopback();
    let mut status = 0;
    unsafe {
        HAL_InitializeSerialPort(4, &mut status);
        assert_eq!(status, code(ErrorKind::InvalidPort));

        HAL_SetSerialBaudRate(-1, 9600, &mut status);
        assert_eq!(status, code(ErrorKind::InvalidPort));
    }
    take_registry();
}

#[test]
#[serial]
fn test_setters_require_open_port() {
    install_loopback();
    let mut status = 0;
    unsafe {
        HAL_SetSerialBaudRate(MXP, 9600, &mut status);
        assert_eq!(status, code(ErrorKind::NotOpen));
        HAL_SetSerialDataBits(MXP, 8, &mut status);
        assert_eq!(status, code(ErrorKind::NotOpen));
        HAL_SetSerialTimeout(MXP, 1.0, &mut status);
        assert_eq!(status, code(ErrorKind::NotOpen));
        HAL_EnableSerialTermination(MXP, b'\n' as c_char, &mut status);
        assert_eq!(status, code(ErrorKind::NotOpen));
        assert_eq!(HAL_GetSerialBytesReceived(MXP, &mut status), 0);
        assert_eq!(status, code(ErrorKind::NotOpen));
    }
    take_registry();
}

#[test]
#[serial]
fn test_setter_argument_codes() {
    let opener = install_loopback();
    let mut status = 0;
    unsafe {
        HAL_InitializeSerialPort(MXP, &mut status);
        assert_eq!(status, 0);

        HAL_SetSerialDataBits(MXP, 9, &mut status);
        assert_eq!(status, code(ErrorKind::InvalidArgument));
        HAL_SetSerialBaudRate(MXP, -9600, &mut status);
        assert_eq!(status, code(ErrorKind::InvalidArgument));
        HAL_SetSerialParity(MXP, 7, &mut status);
        assert_eq!(status, code(ErrorKind::InvalidArgument));
        HAL_SetSerialStopBits(MXP, 3, &mut status);
        assert_eq!(status, code(ErrorKind::InvalidArgument));
        HAL_SetSerialFlowControl(MXP, 3, &mut status);
        assert_eq!(status, code(ErrorKind::InvalidArgument));
        HAL_SetSerialWriteMode(MXP, 0, &mut status);
        assert_eq!(status, code(ErrorKind::InvalidArgument));
        HAL_SetSerialTimeout(MXP, -1.0, &mut status);
        assert_eq!(status, code(ErrorKind::InvalidArgument));
        HAL_SetSerialReadBufferSize(MXP, 0, &mut status);
        assert_eq!(status, code(ErrorKind::InvalidArgument));
        HAL_SetSerialWriteBufferSize(MXP, -5, &mut status);
        assert_eq!(status, code(ErrorKind::InvalidArgument));

        HAL_SetSerialBaudRate(MXP, 19200, &mut status);
        assert_eq!(status, 0);
        HAL_SetSerialDataBits(MXP, 7, &mut status);
        assert_eq!(status, 0);
        HAL_SetSerialParity(MXP, 2, &mut status);
        assert_eq!(status, 0);
        HAL_SetSerialStopBits(MXP, 20, &mut status);
        assert_eq!(status, 0);
        HAL_SetSerialFlowControl(MXP, 1, &mut status);
        assert_eq!(status, 0);
    }

    let applied = opener.device(PortId::Mxp).settings();
    assert_eq!(applied.to_string(), "19200 7E2");
    take_registry();
}

#[test]
#[serial]
fn test_write_read_round_trip() {
    install_loopback();
    let mut status = 0;
    let message = b"drive 0.5\n";
    let mut buffer = [0 as c_char; 32];

    unsafe {
        HAL_InitializeSerialPort(ONBOARD, &mut status);
        assert_eq!(status, 0);
        HAL_EnableSerialTermination(ONBOARD, b'\n' as c_char, &mut status);
        assert_eq!(status, 0);

        let written = HAL_WriteSerial(
            ONBOARD,
            message.as_ptr().cast::<c_char>(),
            message.len() as i32,
            &mut status,
        );
        assert_eq!(status, 0);
        assert_eq!(written, message.len() as i32);

        HAL_FlushSerial(ONBOARD, &mut status);
        assert_eq!(status, 0);
        assert_eq!(
            HAL_GetSerialBytesReceived(ONBOARD, &mut status),
            message.len() as i32
        );

        let read = HAL_ReadSerial(
            ONBOARD,
            buffer.as_mut_ptr(),
            buffer.len() as i32,
            &mut status,
        );
        assert_eq!(status, 0);
        assert_eq!(read, message.len() as i32);
    }

    let received: Vec<u8> = buffer[..message.len()].iter().map(|&c| c as u8).collect();
    assert_eq!(received, message.to_vec());
    take_registry();
}

#[test]
#[serial]
fn test_buffered_write_mode_and_clear() {
    let opener = install_loopback();
    let mut status = 0;
    let data = b"abcdef";

    unsafe {
        HAL_InitializeSerialPort(MXP, &mut status);
        HAL_SetSerialWriteMode(MXP, 2, &mut status);
        assert_eq!(status, 0);
        HAL_SetSerialWriteBufferSize(MXP, 64, &mut status);
        assert_eq!(status, 0);

        HAL_WriteSerial(MXP, data.as_ptr().cast(), data.len() as i32, &mut status);
        assert_eq!(status, 0);
        assert_eq!(opener.device(PortId::Mxp).pending(), 0);

        HAL_FlushSerial(MXP, &mut status);
        assert_eq!(opener.device(PortId::Mxp).pending(), data.len());

        HAL_ClearSerial(MXP, &mut status);
        assert_eq!(status, 0);
        assert_eq!(HAL_GetSerialBytesReceived(MXP, &mut status), 0);

        HAL_DisableSerialTermination(MXP, &mut status);
        assert_eq!(status, 0);
    }
    take_registry();
}

#[test]
#[serial]
fn test_null_pointers() {
    install_loopback();
    let mut status = 0;
    unsafe {
        // a null status pointer is tolerated
        HAL_InitializeSerialPort(ONBOARD, ptr::null_mut());

        assert_eq!(HAL_ReadSerial(ONBOARD, ptr::null_mut(), 4, &mut status), 0);
        assert_eq!(status, code(ErrorKind::InvalidArgument));

        assert_eq!(HAL_WriteSerial(ONBOARD, ptr::null(), 4, &mut status), 0);
        assert_eq!(status, code(ErrorKind::InvalidArgument));

        assert_eq!(HAL_WriteSerial(ONBOARD, ptr::null(), 0, &mut status), 0);
        assert_eq!(status, 0);

        let mut buffer = [0 as c_char; 4];
        HAL_ReadSerial(ONBOARD, buffer.as_mut_ptr(), -1, &mut status);
        assert_eq!(status, code(ErrorKind::InvalidArgument));

        HAL_CloseSerial(ONBOARD, &mut status);
        assert_eq!(status, 0);
    }
    take_registry();
}

#[test]
#[serial]
fn test_blocked_read_does_not_stall_other_ports() {
    let opener = install_loopback();
    let mut status = 0;
    unsafe {
        HAL_InitializeSerialPort(ONBOARD, &mut status);
        HAL_InitializeSerialPort(MXP, &mut status);
        assert_eq!(status, 0);
        HAL_SetSerialTimeout(ONBOARD, 1.0, &mut status);
        assert_eq!(status, 0);
    }

    let reader = thread::spawn(|| {
        let mut buf = [0 as c_char; 8];
        let mut status = 1;
        let start = Instant::now();
        let n = unsafe { HAL_ReadSerial(ONBOARD, buf.as_mut_ptr(), 8, &mut status) };
        (n, status, start.elapsed())
    });
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    let n = unsafe { HAL_WriteSerial(MXP, b"x".as_ptr().cast(), 1, &mut status) };
    let elapsed = start.elapsed();
    assert_eq!((n, status), (1, 0));
    assert!(elapsed < Duration::from_millis(500), "write waited {elapsed:?}");
    assert_eq!(opener.device(PortId::Mxp).pending(), 1);

    let (n, status, waited) = reader.join().unwrap();
    assert_eq!((n, status), (0, 0));
    assert!(waited >= Duration::from_millis(900));
    take_registry();
}

#[test]
#[serial]
fn test_close_waits_for_call_on_same_port() {
    install_loopback();
    let mut status = 0;
    unsafe {
        HAL_InitializeSerialPort(ONBOARD, &mut status);
        HAL_SetSerialTimeout(ONBOARD, 0.3, &mut status);
        assert_eq!(status, 0);
    }

    let reader = thread::spawn(|| {
        let mut buf = [0 as c_char; 4];
        let mut status = 1;
        let n = unsafe { HAL_ReadSerial(ONBOARD, buf.as_mut_ptr(), 4, &mut status) };
        (n, status)
    });
    thread::sleep(Duration::from_millis(50));

    unsafe {
        HAL_CloseSerial(ONBOARD, &mut status);
        assert_eq!(status, 0);
    }
    assert_eq!(reader.join().unwrap(), (0, 0));

    unsafe {
        HAL_ReadSerial(ONBOARD, ptr::null_mut(), 0, &mut status);
        assert_eq!(status, code(ErrorKind::NotOpen));
    }
    take_registry();
}
