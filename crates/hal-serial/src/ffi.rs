//! C interface
//!
//! `extern "C"` functions matching `HAL/SerialPort.h`. Every function takes
//! the raw port number and an `int32_t*` status that receives `0` on success
//! or a negative [`ErrorKind`](crate::port::ErrorKind) code. A null status
//! pointer is allowed; the status is then simply not reported.
//!
//! C callers share a single registry, created on first use from
//! [`SerialConfig::from_env`]. Rust hosts (and tests) can swap in their own
//! with [`install_registry`]. The registry lock is only held to look up or
//! detach a port; I/O runs under the port's own session lock, so calls on
//! different ports never wait for each other.

#![allow(non_snake_case)]

use std::os::raw::c_char;
use std::slice;
use std::sync::{Mutex, MutexGuard};

use crate::config::SerialConfig;
use crate::port::settings::timeout_from_secs;
use crate::port::{
    DataBits, FlowControl, Parity, PortId, Registry, SerialError, Session, StopBits,
    SystemOpener, WriteMode,
};

static REGISTRY: Mutex<Option<Registry>> = Mutex::new(None);

fn lock_registry() -> MutexGuard<'static, Option<Registry>> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

/// Replace the registry used by the C interface, returning the previous one
pub fn install_registry(registry: Registry) -> Option<Registry> {
    lock_registry().replace(registry)
}

/// Remove the registry used by the C interface. The next call creates a
/// fresh one from the environment.
pub fn take_registry() -> Option<Registry> {
    lock_registry().take()
}

fn with_registry<T>(
    f: impl FnOnce(&mut Registry) -> Result<T, SerialError>,
) -> Result<T, SerialError> {
    let mut guard = lock_registry();
    let registry = match guard.take() {
        Some(registry) => registry,
        None => {
            let config = SerialConfig::from_env()?;
            tracing::info!("creating serial registry from environment");
            Registry::with_defaults(SystemOpener::new(config.devices), config.defaults)
        }
    };
    f(guard.insert(registry))
}

fn with_session<T>(
    port: i32,
    f: impl FnOnce(&mut Session) -> Result<T, SerialError>,
) -> Result<T, SerialError> {
    let port = PortId::try_from(port)?;
    let shared = with_registry(|registry| registry.shared(port).cloned())?;
    let mut session = shared.lock().unwrap_or_else(|e| e.into_inner());
    // closed by another thread between lookup and lock
    if session.is_closed() {
        return Err(SerialError::NotOpen(port));
    }
    f(&mut session)
}

/// Store the outcome in `status` and return the value, or `fallback` on error
unsafe fn report<T>(status: *mut i32, result: Result<T, SerialError>, fallback: T) -> T {
    let (code, value) = match result {
        Ok(value) => (0, value),
        Err(e) => {
            tracing::debug!("serial call failed: {e}");
            (e.status_code(), fallback)
        }
    };
    if !status.is_null() {
        *status = code;
    }
    value
}

fn positive_size(which: &str, size: i32) -> Result<usize, SerialError> {
    usize::try_from(size)
        .map_err(|_| SerialError::invalid(format!("{} buffer size must be positive", which)))
}

fn count_arg(count: i32) -> Result<usize, SerialError> {
    usize::try_from(count).map_err(|_| SerialError::invalid("count must not be negative"))
}

/// Open a serial port.
///
/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_InitializeSerialPort(port: i32, status: *mut i32) {
    let result = PortId::try_from(port)
        .and_then(|port| with_registry(|registry| registry.initialize(port).map(|_| ())));
    report(status, result, ())
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_SetSerialBaudRate(port: i32, baud: i32, status: *mut i32) {
    let result = with_session(port, |s| {
        let baud = u32::try_from(baud)
            .map_err(|_| SerialError::invalid(format!("baud rate out of range: {}", baud)))?;
        s.set_baud_rate(baud)
    });
    report(status, result, ())
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_SetSerialDataBits(port: i32, bits: i32, status: *mut i32) {
    let result = with_session(port, |s| s.set_data_bits(DataBits::try_from(bits)?));
    report(status, result, ())
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_SetSerialParity(port: i32, parity: i32, status: *mut i32) {
    let result = with_session(port, |s| s.set_parity(Parity::try_from(parity)?));
    report(status, result, ())
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_SetSerialStopBits(port: i32, stop_bits: i32, status: *mut i32) {
    let result = with_session(port, |s| s.set_stop_bits(StopBits::try_from(stop_bits)?));
    report(status, result, ())
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_SetSerialWriteMode(port: i32, mode: i32, status: *mut i32) {
    let result = with_session(port, |s| s.set_write_mode(WriteMode::try_from(mode)?));
    report(status, result, ())
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_SetSerialFlowControl(port: i32, flow: i32, status: *mut i32) {
    let result = with_session(port, |s| s.set_flow_control(FlowControl::try_from(flow)?));
    report(status, result, ())
}

/// Set the read timeout in seconds.
///
/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_SetSerialTimeout(port: i32, timeout: f64, status: *mut i32) {
    let result = with_session(port, |s| s.set_timeout(timeout_from_secs(timeout)?));
    report(status, result, ())
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_EnableSerialTermination(
    port: i32,
    terminator: c_char,
    status: *mut i32,
) {
    let result = with_session(port, |s| {
        s.enable_termination(terminator as u8);
        Ok(())
    });
    report(status, result, ())
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_DisableSerialTermination(port: i32, status: *mut i32) {
    let result = with_session(port, |s| {
        s.disable_termination();
        Ok(())
    });
    report(status, result, ())
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_SetSerialReadBufferSize(port: i32, size: i32, status: *mut i32) {
    let result = with_session(port, |s| s.set_read_buffer_size(positive_size("read", size)?));
    report(status, result, ())
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_SetSerialWriteBufferSize(port: i32, size: i32, status: *mut i32) {
    let result = with_session(port, |s| s.set_write_buffer_size(positive_size("write", size)?));
    report(status, result, ())
}

/// Number of bytes that can be read without blocking.
///
/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_GetSerialBytesReceived(port: i32, status: *mut i32) -> i32 {
    let result = with_session(port, |s| {
        s.bytes_available()
            .map(|n| i32::try_from(n).unwrap_or(i32::MAX))
    });
    report(status, result, 0)
}

/// Read up to `count` bytes into `buffer`, returning how many were read.
///
/// # Safety
/// `buffer` must be valid for `count` bytes of writes; `status` must be null
/// or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_ReadSerial(
    port: i32,
    buffer: *mut c_char,
    count: i32,
    status: *mut i32,
) -> i32 {
    let result = count_arg(count).and_then(|count| {
        if buffer.is_null() && count > 0 {
            return Err(SerialError::invalid("read buffer is null"));
        }
        with_session(port, |s| {
            let data = s.read(count)?;
            if !data.is_empty() {
                let out = slice::from_raw_parts_mut(buffer.cast::<u8>(), count);
                out[..data.len()].copy_from_slice(&data);
            }
            Ok(data.len() as i32)
        })
    });
    report(status, result, 0)
}

/// Write `count` bytes from `buffer`, returning how many were accepted.
///
/// # Safety
/// `buffer` must be valid for `count` bytes of reads; `status` must be null
/// or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_WriteSerial(
    port: i32,
    buffer: *const c_char,
    count: i32,
    status: *mut i32,
) -> i32 {
    let result = count_arg(count).and_then(|count| {
        if buffer.is_null() && count > 0 {
            return Err(SerialError::invalid("write buffer is null"));
        }
        with_session(port, |s| {
            let data: &[u8] = if count == 0 {
                &[]
            } else {
                slice::from_raw_parts(buffer.cast::<u8>(), count)
            };
            s.write(data).map(|n| n as i32)
        })
    });
    report(status, result, 0)
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_FlushSerial(port: i32, status: *mut i32) {
    let result = with_session(port, |s| s.flush());
    report(status, result, ())
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_ClearSerial(port: i32, status: *mut i32) {
    let result = with_session(port, |s| s.clear());
    report(status, result, ())
}

/// # Safety
/// `status` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn HAL_CloseSerial(port: i32, status: *mut i32) {
    let result = PortId::try_from(port).and_then(|port| {
        let shared = with_registry(|registry| registry.detach(port))?;
        Registry::release(port, shared);
        Ok(())
    });
    report(status, result, ())
}
