//! In-memory loopback devices
//!
//! Stand-ins for real UARTs: a self-loopback echoes every written byte back
//! into its own input, and a null-modem pair wires two ends together. Reads
//! block on a condition variable, so another thread writing to the far end
//! wakes a pending reader the same way a real line would.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use super::registry::PortOpener;
use super::settings::{DataBits, FlowControl, LineSettings, Parity, StopBits};
use super::transport::Transport;
use super::{PortId, SerialError};

/// One direction of a loopback line
#[derive(Default)]
struct Line {
    data: Mutex<VecDeque<u8>>,
    ready: Condvar,
}

impl Line {
    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        // A panicking test thread must not wedge every other reader
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, bytes: &[u8]) {
        self.lock().extend(bytes);
        self.ready.notify_all();
    }
}

/// An in-memory serial device
///
/// Clones share the same line, settings, fault flag and write limit, so a
/// test can keep a clone to inspect a device after handing it to a session.
#[derive(Clone)]
pub struct LoopbackTransport {
    rx: Arc<Line>,
    tx: Arc<Line>,
    settings: Arc<Mutex<LineSettings>>,
    faulted: Arc<AtomicBool>,
    /// Bytes the device still takes before writes time out
    write_budget: Arc<AtomicUsize>,
    flushes: Arc<AtomicUsize>,
}

const UNLIMITED: usize = usize::MAX;

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    fn wired(rx: Arc<Line>, tx: Arc<Line>) -> Self {
        Self {
            rx,
            tx,
            settings: Arc::new(Mutex::new(LineSettings::default())),
            faulted: Arc::new(AtomicBool::new(false)),
            write_budget: Arc::new(AtomicUsize::new(UNLIMITED)),
            flushes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A device whose output is wired back to its own input
    pub fn new() -> Self {
        let line = Arc::new(Line::default());
        Self::wired(line.clone(), line)
    }

    /// Two devices connected by a null-modem cable
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Line::default());
        let b_to_a = Arc::new(Line::default());
        (
            Self::wired(b_to_a.clone(), a_to_b.clone()),
            Self::wired(a_to_b, b_to_a),
        )
    }

    /// Queue bytes on this device's input as if the far end had sent them
    pub fn inject(&self, bytes: &[u8]) {
        self.rx.push(bytes);
    }

    /// Number of bytes waiting on this device's input
    pub fn pending(&self) -> usize {
        self.rx.lock().len()
    }

    /// Settings most recently applied to the device
    pub fn settings(&self) -> LineSettings {
        self.settings_lock().clone()
    }

    /// Make every subsequent read and write fail, as if the cable was pulled
    pub fn set_faulted(&self, faulted: bool) {
        self.faulted.store(faulted, Ordering::SeqCst);
    }

    /// Let the device take only `limit` more bytes; after that writes time
    /// out, like a line held off by flow control. `None` lifts the limit.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.write_budget
            .store(limit.unwrap_or(UNLIMITED), Ordering::SeqCst);
    }

    /// How many times the device has been flushed
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    fn settings_lock(&self) -> MutexGuard<'_, LineSettings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_fault(&self) -> io::Result<()> {
        if self.faulted.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "loopback device disconnected",
            ));
        }
        Ok(())
    }
}

impl Read for LoopbackTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_fault()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let timeout = self.settings_lock().timeout;
        let guard = self.rx.lock();
        let (mut data, _) = self
            .rx
            .ready
            .wait_timeout_while(guard, timeout, |data| data.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        if data.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "loopback read timed out",
            ));
        }
        let n = buf.len().min(data.len());
        for (slot, byte) in buf.iter_mut().zip(data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for LoopbackTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_fault()?;
        let budget = self.write_budget.load(Ordering::SeqCst);
        if budget == 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "loopback write timed out",
            ));
        }
        let n = buf.len().min(budget);
        if budget != UNLIMITED {
            self.write_budget.store(budget - n, Ordering::SeqCst);
        }
        self.tx.push(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_fault()?;
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Transport for LoopbackTransport {
    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        self.settings_lock().baud_rate = baud;
        Ok(())
    }

    fn set_data_bits(&mut self, bits: DataBits) -> io::Result<()> {
        self.settings_lock().data_bits = bits;
        Ok(())
    }

    fn set_parity(&mut self, parity: Parity) -> io::Result<()> {
        self.settings_lock().parity = parity;
        Ok(())
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> io::Result<()> {
        self.settings_lock().stop_bits = stop_bits;
        Ok(())
    }

    fn set_flow_control(&mut self, flow: FlowControl) -> io::Result<()> {
        self.settings_lock().flow_control = flow;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.settings_lock().timeout = timeout;
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.check_fault()?;
        Ok(u32::try_from(self.pending()).unwrap_or(u32::MAX))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.rx.lock().clear();
        Ok(())
    }

    fn clear_output(&mut self) -> io::Result<()> {
        // Written bytes land on the far end immediately, nothing is held back
        Ok(())
    }
}

#[derive(Default)]
struct OpenerState {
    devices: HashMap<PortId, LoopbackTransport>,
    unplugged: HashSet<PortId>,
}

/// Opens loopback devices in place of hardware
///
/// Each port gets a self-loopback on first open unless [`connect`] wired it
/// to another port. Clones share state, so tests can keep a handle after
/// moving the opener into a [`Registry`](super::Registry).
///
/// [`connect`]: LoopbackOpener::connect
#[derive(Clone, Default)]
pub struct LoopbackOpener {
    state: Arc<Mutex<OpenerState>>,
}

impl LoopbackOpener {
    /// Opener with no devices yet
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, OpenerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wire two ports together with a null-modem pair
    pub fn connect(&self, a: PortId, b: PortId) {
        let (end_a, end_b) = LoopbackTransport::pair();
        let mut state = self.lock();
        state.devices.insert(a, end_a);
        state.devices.insert(b, end_b);
    }

    /// Device backing `port`, created on demand
    pub fn device(&self, port: PortId) -> LoopbackTransport {
        self.lock()
            .devices
            .entry(port)
            .or_insert_with(LoopbackTransport::new)
            .clone()
    }

    /// Make opens of `port` fail until [`plug`](LoopbackOpener::plug) is called
    pub fn unplug(&self, port: PortId) {
        self.lock().unplugged.insert(port);
    }

    /// Undo [`unplug`](LoopbackOpener::unplug)
    pub fn plug(&self, port: PortId) {
        self.lock().unplugged.remove(&port);
    }
}

impl PortOpener for LoopbackOpener {
    fn open(
        &mut self,
        port: PortId,
        settings: &LineSettings,
    ) -> Result<Box<dyn Transport>, SerialError> {
        if self.lock().unplugged.contains(&port) {
            return Err(SerialError::DeviceUnavailable {
                port,
                reason: "no loopback device attached".to_string(),
            });
        }
        let mut device = self.device(port);
        device.apply(settings).map_err(SerialError::from_transport)?;
        Ok(Box::new(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn quick(device: &mut LoopbackTransport) {
        device.set_timeout(Duration::from_millis(20)).unwrap();
    }

    #[test]
    fn test_self_loopback_echoes() {
        let mut device = LoopbackTransport::new();
        quick(&mut device);
        device.write_all(b"ping").unwrap();
        assert_eq!(device.bytes_to_read().unwrap(), 4);

        let mut buf = [0u8; 8];
        let n = device.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn test_empty_read_times_out() {
        let mut device = LoopbackTransport::new();
        quick(&mut device);
        let start = Instant::now();
        let err = device.read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_pair_crosses_lines() {
        let (mut a, mut b) = LoopbackTransport::pair();
        quick(&mut a);
        quick(&mut b);
        a.write_all(b"abc").unwrap();
        assert_eq!(a.pending(), 0);
        assert_eq!(b.pending(), 3);
    }

    #[test]
    fn test_blocked_reader_wakes_on_write() {
        let (mut a, mut b) = LoopbackTransport::pair();
        b.set_timeout(Duration::from_secs(5)).unwrap();

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            a.write_all(b"x").unwrap();
        });

        let mut buf = [0u8; 1];
        assert_eq!(b.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'x');
        writer.join().unwrap();
    }

    #[test]
    fn test_fault_breaks_io() {
        let mut device = LoopbackTransport::new();
        device.set_faulted(true);
        assert_eq!(
            device.write(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn test_write_limit_stalls_output() {
        let mut device = LoopbackTransport::new();
        device.set_write_limit(Some(3));
        assert_eq!(device.write(b"abcdef").unwrap(), 3);
        assert_eq!(
            device.write(b"def").unwrap_err().kind(),
            io::ErrorKind::TimedOut
        );
        assert_eq!(device.pending(), 3);

        device.set_write_limit(None);
        assert_eq!(device.write(b"def").unwrap(), 3);
        assert_eq!(device.pending(), 6);
    }

    #[test]
    fn test_opener_unplugged_port() {
        let mut opener = LoopbackOpener::new();
        opener.unplug(PortId::Usb2);
        assert!(matches!(
            opener.open(PortId::Usb2, &LineSettings::default()),
            Err(SerialError::DeviceUnavailable { port: PortId::Usb2, .. })
        ));
        opener.plug(PortId::Usb2);
        assert!(opener.open(PortId::Usb2, &LineSettings::default()).is_ok());
    }
}
