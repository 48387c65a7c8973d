//! Port sessions
//!
//! A [`Session`] owns the open transport of one port together with its line
//! settings, termination state and the two user-space buffers: bytes read
//! from the device but not yet delivered, and bytes written in
//! [`WriteMode::FlushWhenFull`] that have not reached the device.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::framing::Termination;
use super::settings::{
    validate_baud_rate, validate_buffer_size, DataBits, FlowControl, LineSettings, Parity,
    StopBits, WriteMode,
};
use super::transport::Transport;
use super::{PortId, SerialError};

/// An open serial port
pub struct Session {
    port: PortId,
    transport: Box<dyn Transport>,
    settings: LineSettings,
    termination: Termination,
    /// Read from the device, not yet handed to a caller
    staged: VecDeque<u8>,
    /// Accepted from callers, not yet written to the device
    pending: Vec<u8>,
    scratch: Vec<u8>,
    tx_bytes: u64,
    rx_bytes: u64,
    closed: bool,
}

impl Session {
    /// Wrap a transport that has already been configured with `settings`
    pub fn new(port: PortId, transport: Box<dyn Transport>, settings: LineSettings) -> Self {
        Self {
            port,
            transport,
            settings,
            termination: Termination::disabled(),
            staged: VecDeque::new(),
            pending: Vec::new(),
            scratch: Vec::new(),
            tx_bytes: 0,
            rx_bytes: 0,
            closed: false,
        }
    }

    /// Port this session belongs to
    pub fn port(&self) -> PortId {
        self.port
    }

    /// Current line settings
    pub fn settings(&self) -> &LineSettings {
        &self.settings
    }

    /// Current termination state
    pub fn termination(&self) -> Termination {
        self.termination
    }

    /// Cumulative bytes written to and read from the device
    pub fn counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.rx_bytes)
    }

    /// Bytes accepted by `write` but still held in the write buffer
    pub fn buffered_output(&self) -> usize {
        self.pending.len()
    }

    // ---- line configuration ----

    /// Set the baud rate, rejecting zero
    pub fn set_baud_rate(&mut self, baud: u32) -> Result<(), SerialError> {
        let baud = validate_baud_rate(baud)?;
        self.transport
            .set_baud_rate(baud)
            .map_err(SerialError::from_transport)?;
        self.settings.baud_rate = baud;
        debug!(port = %self.port, baud, "baud rate set");
        Ok(())
    }

    /// Set the number of data bits
    pub fn set_data_bits(&mut self, bits: DataBits) -> Result<(), SerialError> {
        self.transport
            .set_data_bits(bits)
            .map_err(SerialError::from_transport)?;
        self.settings.data_bits = bits;
        debug!(port = %self.port, ?bits, "data bits set");
        Ok(())
    }

    /// Set the parity mode
    pub fn set_parity(&mut self, parity: Parity) -> Result<(), SerialError> {
        self.transport
            .set_parity(parity)
            .map_err(SerialError::from_transport)?;
        self.settings.parity = parity;
        debug!(port = %self.port, ?parity, "parity set");
        Ok(())
    }

    /// Set the number of stop bits
    pub fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<(), SerialError> {
        self.transport
            .set_stop_bits(stop_bits)
            .map_err(SerialError::from_transport)?;
        self.settings.stop_bits = stop_bits;
        debug!(port = %self.port, %stop_bits, "stop bits set");
        Ok(())
    }

    /// Set the flow control mechanism
    pub fn set_flow_control(&mut self, flow: FlowControl) -> Result<(), SerialError> {
        self.transport
            .set_flow_control(flow)
            .map_err(SerialError::from_transport)?;
        self.settings.flow_control = flow;
        debug!(port = %self.port, ?flow, "flow control set");
        Ok(())
    }

    /// Set how long reads may block. Zero makes reads return whatever is
    /// already available.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), SerialError> {
        self.transport
            .set_timeout(timeout)
            .map_err(SerialError::from_transport)?;
        self.settings.timeout = timeout;
        debug!(port = %self.port, ?timeout, "timeout set");
        Ok(())
    }

    /// Set the largest chunk pulled from the device by a single device read
    pub fn set_read_buffer_size(&mut self, size: usize) -> Result<(), SerialError> {
        self.settings.read_buffer_size = validate_buffer_size("read", size)?;
        Ok(())
    }

    /// Set the write buffer capacity. In [`WriteMode::FlushWhenFull`], bytes
    /// already buffered beyond the new size are pushed out immediately.
    pub fn set_write_buffer_size(&mut self, size: usize) -> Result<(), SerialError> {
        self.settings.write_buffer_size = validate_buffer_size("write", size)?;
        self.drain_full_buffers()
    }

    /// Switch write mode. Leaving [`WriteMode::FlushWhenFull`] flushes
    /// whatever is still buffered.
    pub fn set_write_mode(&mut self, mode: WriteMode) -> Result<(), SerialError> {
        if mode == WriteMode::FlushOnAccess && !self.pending.is_empty() {
            self.flush()?;
        }
        self.settings.write_mode = mode;
        debug!(port = %self.port, ?mode, "write mode set");
        Ok(())
    }

    // ---- framing ----

    /// End reads early once `terminator` has been read
    pub fn enable_termination(&mut self, terminator: u8) {
        self.termination.enable(terminator);
        debug!(port = %self.port, terminator, "termination enabled");
    }

    /// Let reads run to `max_count` or the timeout again
    pub fn disable_termination(&mut self) {
        self.termination.disable();
        debug!(port = %self.port, "termination disabled");
    }

    // ---- I/O ----

    /// Bytes that can be read without waiting
    pub fn bytes_available(&mut self) -> Result<u32, SerialError> {
        let device = self
            .transport
            .bytes_to_read()
            .map_err(SerialError::from_transport)?;
        let staged = u32::try_from(self.staged.len()).unwrap_or(u32::MAX);
        Ok(staged.saturating_add(device))
    }

    /// Read up to `max_count` bytes.
    ///
    /// Blocks until `max_count` bytes have arrived, the terminator has been
    /// read (when termination is enabled), or the timeout expires. Expiry is
    /// not an error: whatever arrived so far is returned, possibly nothing.
    pub fn read(&mut self, max_count: usize) -> Result<Vec<u8>, SerialError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let result = self.read_frame(max_count);

        // fills shorten the device timeout to the time left, put it back
        if let Err(e) = self.transport.set_timeout(self.settings.timeout) {
            warn!(port = %self.port, "failed to restore read timeout: {e}");
        }

        let n = result?;
        let frame: Vec<u8> = self.staged.drain(..n).collect();
        Ok(frame)
    }

    /// Returns how many staged bytes make up the frame to deliver
    fn read_frame(&mut self, max_count: usize) -> Result<usize, SerialError> {
        let deadline = Instant::now() + self.settings.timeout;
        let mut attempted = false;

        loop {
            let staged = self.staged.make_contiguous();
            let n = self.termination.frame_len(staged, max_count);
            if n == max_count || self.termination.completes(&staged[..n]) {
                return Ok(n);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() && attempted {
                return Ok(n);
            }
            attempted = true;
            self.fill(remaining)?;
        }
    }

    /// Pull at most one read buffer's worth from the device
    fn fill(&mut self, timeout: Duration) -> Result<usize, SerialError> {
        self.transport
            .set_timeout(timeout)
            .map_err(SerialError::from_transport)?;

        self.scratch.resize(self.settings.read_buffer_size, 0);
        match self.transport.read(&mut self.scratch) {
            Ok(n) => {
                self.staged.extend(&self.scratch[..n]);
                self.rx_bytes += n as u64;
                Ok(n)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(SerialError::Io(e)),
        }
    }

    /// Write `data`, returning how many bytes were accepted.
    ///
    /// In [`WriteMode::FlushOnAccess`] the bytes go straight to the device,
    /// which is then flushed; a device write timeout yields a short count and
    /// skips the flush.
    /// In [`WriteMode::FlushWhenFull`] the bytes are buffered and every full
    /// write buffer is pushed to the device. If the device fails while doing
    /// so, none of `data` that is still unsent stays buffered: the error is
    /// returned when nothing of `data` reached the device, otherwise the
    /// count that did. Retrying the unaccepted tail never duplicates bytes.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        match self.settings.write_mode {
            WriteMode::FlushOnAccess => {
                let written = self.write_through(data)?;
                if written == data.len() {
                    self.transport.flush().map_err(SerialError::from_transport)?;
                }
                Ok(written)
            }
            WriteMode::FlushWhenFull => {
                let before = self.pending.len();
                self.pending.extend_from_slice(data);
                let total = self.pending.len();
                match self.drain_full_buffers() {
                    Ok(()) => Ok(data.len()),
                    Err(e) => {
                        // drained from the front, so what is left of data is the tail
                        let sent = (total - self.pending.len()).saturating_sub(before);
                        let unsent = data.len() - sent;
                        self.pending.truncate(self.pending.len() - unsent);
                        if sent == 0 {
                            Err(e)
                        } else {
                            warn!(port = %self.port, sent, "device failed mid-write: {e}");
                            Ok(sent)
                        }
                    }
                }
            }
        }
    }

    /// Push out buffered bytes and wait for the device to transmit them
    pub fn flush(&mut self) -> Result<(), SerialError> {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            let written = self.write_through(&pending);
            let written = match written {
                Ok(n) => n,
                Err(e) => {
                    self.pending = pending;
                    return Err(e);
                }
            };
            if written < pending.len() {
                self.pending = pending[written..].to_vec();
                return Err(SerialError::Timeout);
            }
        }
        self.transport.flush().map_err(SerialError::from_transport)
    }

    /// Discard everything received but not yet read
    pub fn clear(&mut self) -> Result<(), SerialError> {
        let dropped = self.staged.len();
        self.staged.clear();
        self.transport
            .clear_input()
            .map_err(SerialError::from_transport)?;
        debug!(port = %self.port, dropped, "input cleared");
        Ok(())
    }

    /// Drop buffered output, in the session and on the device, unsent
    pub fn discard_output(&mut self) {
        let dropped = self.pending.len();
        self.pending.clear();
        if let Err(e) = self.transport.clear_output() {
            warn!(port = %self.port, "failed to clear device output: {e}");
        }
        debug!(port = %self.port, dropped, "output discarded");
    }

    /// Flush buffered output before the session goes away
    pub(crate) fn finish(&mut self) -> Result<(), SerialError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.flush()
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// Set once the registry has closed the port
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    fn drain_full_buffers(&mut self) -> Result<(), SerialError> {
        if self.settings.write_mode != WriteMode::FlushWhenFull {
            return Ok(());
        }
        let size = self.settings.write_buffer_size;
        while self.pending.len() >= size {
            let chunk: Vec<u8> = self.pending[..size].to_vec();
            let written = self.write_through(&chunk)?;
            self.pending.drain(..written);
            if written < size {
                // device stalled, the rest stays buffered
                break;
            }
        }
        Ok(())
    }

    /// Write to the device until done, stalled, or failed. A failure after
    /// some bytes went out is reported as a short count.
    fn write_through(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        let mut written = 0;
        while written < data.len() {
            match self.transport.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => {
                    written += n;
                    self.tx_bytes += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                    warn!(
                        port = %self.port,
                        written,
                        requested = data.len(),
                        "write timed out"
                    );
                    break;
                }
                Err(e) if written == 0 => return Err(SerialError::Io(e)),
                Err(e) => {
                    warn!(port = %self.port, written, "write failed part way: {e}");
                    break;
                }
            }
        }
        Ok(written)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("port", &self.port)
            .field("settings", &self.settings)
            .field("termination", &self.termination)
            .field("staged", &self.staged.len())
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}
