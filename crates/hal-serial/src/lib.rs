//! # hal-serial
//!
//! Serial port support for a robot controller's hardware abstraction layer.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A registry of the controller's fixed serial ports (Onboard, MXP, USB1, USB2)
//! - Line configuration: baud rate, data bits, parity, stop bits, flow control
//! - Termination-byte framing for reads
//! - Buffered blocking read/write/flush/clear with timeouts
//! - A C interface matching `HAL/SerialPort.h`
//! - In-memory loopback devices for testing without hardware
//!
//! ## Example
//!
//! ```rust,no_run
//! use hal_serial::port::{PortId, Registry, SystemOpener};
//!
//! # fn main() -> Result<(), hal_serial::port::SerialError> {
//! let mut registry = Registry::new(SystemOpener::default());
//!
//! let mut session = registry.initialize(PortId::Usb1)?;
//! session.set_baud_rate(115200)?;
//! session.enable_termination(b'\n');
//!
//! session.write(b"status?\n")?;
//! let line = session.read(64)?;
//! println!("{}", String::from_utf8_lossy(&line));
//! drop(session);
//!
//! registry.close(PortId::Usb1)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ffi;
pub mod port;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{DevicePaths, SerialConfig};
    pub use crate::port::{
        DataBits, FlowControl, LineSettings, LoopbackOpener, Parity, PortId, Registry,
        SerialError, Session, StopBits, SystemOpener, WriteMode,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
