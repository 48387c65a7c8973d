//! Device transports
//!
//! A [`Transport`] is the open OS handle behind a session. Sessions only talk
//! to this trait, which lets the registry hand out real serial devices or
//! in-memory loopbacks interchangeably.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::settings::{DataBits, FlowControl, LineSettings, Parity, StopBits};

/// An open serial device
///
/// `read` must return `Ok(0)` or an `io::ErrorKind::TimedOut` error once the
/// configured timeout elapses without data. Settings the device cannot
/// express are rejected with `io::ErrorKind::Unsupported`.
pub trait Transport: Read + Write + Send {
    /// Set the baud rate
    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()>;

    /// Set the number of data bits
    fn set_data_bits(&mut self, bits: DataBits) -> io::Result<()>;

    /// Set the parity mode
    fn set_parity(&mut self, parity: Parity) -> io::Result<()>;

    /// Set the number of stop bits
    fn set_stop_bits(&mut self, stop_bits: StopBits) -> io::Result<()>;

    /// Set the flow control mode
    fn set_flow_control(&mut self, flow: FlowControl) -> io::Result<()>;

    /// Set the timeout used by blocking reads and writes
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Get number of bytes available to read
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Discard unread input
    fn clear_input(&mut self) -> io::Result<()>;

    /// Discard output not yet transmitted
    fn clear_output(&mut self) -> io::Result<()>;

    /// Apply a full set of line settings, field by field
    fn apply(&mut self, settings: &LineSettings) -> io::Result<()> {
        self.set_baud_rate(settings.baud_rate)?;
        self.set_data_bits(settings.data_bits)?;
        self.set_parity(settings.parity)?;
        self.set_stop_bits(settings.stop_bits)?;
        self.set_flow_control(settings.flow_control)?;
        self.set_timeout(settings.timeout)
    }
}

fn unsupported(what: String) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, what)
}

fn to_io(e: serialport::Error) -> io::Error {
    io::Error::from(e)
}

/// Serial port wrapper implementing [`Transport`] on top of `serialport`
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// Open `device` and configure it with `settings`
    pub fn open(device: &str, settings: &LineSettings) -> io::Result<Self> {
        let port = serialport::new(device, settings.baud_rate)
            .data_bits(serial_data_bits(settings.data_bits))
            .parity(serial_parity(settings.parity)?)
            .stop_bits(serial_stop_bits(settings.stop_bits)?)
            .flow_control(serial_flow_control(settings.flow_control)?)
            .timeout(settings.timeout)
            .open()
            .map_err(to_io)?;
        Ok(Self::new(port))
    }

    /// Device name as reported by the OS, if any
    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

fn serial_data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn serial_parity(parity: Parity) -> io::Result<serialport::Parity> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Mark | Parity::Space => {
            Err(unsupported(format!("{:?} parity is not supported", parity)))
        }
    }
}

fn serial_stop_bits(stop_bits: StopBits) -> io::Result<serialport::StopBits> {
    match stop_bits {
        StopBits::One => Ok(serialport::StopBits::One),
        StopBits::Two => Ok(serialport::StopBits::Two),
        StopBits::OnePointFive => Err(unsupported("1.5 stop bits are not supported".into())),
    }
}

fn serial_flow_control(flow: FlowControl) -> io::Result<serialport::FlowControl> {
    match flow {
        FlowControl::None => Ok(serialport::FlowControl::None),
        FlowControl::XonXoff => Ok(serialport::FlowControl::Software),
        FlowControl::RtsCts => Ok(serialport::FlowControl::Hardware),
        FlowControl::DtrDsr => Err(unsupported("DTR/DSR flow control is not supported".into())),
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        self.port.set_baud_rate(baud).map_err(to_io)
    }

    fn set_data_bits(&mut self, bits: DataBits) -> io::Result<()> {
        self.port.set_data_bits(serial_data_bits(bits)).map_err(to_io)
    }

    fn set_parity(&mut self, parity: Parity) -> io::Result<()> {
        self.port.set_parity(serial_parity(parity)?).map_err(to_io)
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> io::Result<()> {
        self.port
            .set_stop_bits(serial_stop_bits(stop_bits)?)
            .map_err(to_io)
    }

    fn set_flow_control(&mut self, flow: FlowControl) -> io::Result<()> {
        self.port
            .set_flow_control(serial_flow_control(flow)?)
            .map_err(to_io)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(to_io)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(to_io)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(to_io)
    }

    fn clear_output(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Output)
            .map_err(to_io)
    }
}
