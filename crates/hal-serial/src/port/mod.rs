//! Serial Port Management
//!
//! Registry, line configuration, framing and blocking I/O for the
//! controller's serial ports.

mod discovery;
mod error;
pub mod framing;
pub mod loopback;
mod registry;
mod session;
pub mod settings;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use discovery::{list_devices, usb_device, DeviceInfo};
pub use error::{ErrorKind, SerialError};
pub use framing::{Termination, DEFAULT_TERMINATOR};
pub use loopback::{LoopbackOpener, LoopbackTransport};
pub use registry::{PortOpener, Registry, SessionGuard, SystemOpener};
pub use session::Session;
pub use settings::{DataBits, FlowControl, LineSettings, Parity, StopBits, WriteMode};
pub use transport::{SerialTransport, Transport};

/// One of the controller's serial ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortId {
    /// The RS-232 port on the controller itself
    Onboard = 0,
    /// The UART on the MXP expansion connector
    Mxp = 1,
    /// First USB serial adapter
    Usb1 = 2,
    /// Second USB serial adapter
    Usb2 = 3,
}

impl PortId {
    /// Number of ports
    pub const COUNT: usize = 4;

    /// Every port, in identifier order
    pub const ALL: [PortId; PortId::COUNT] =
        [PortId::Onboard, PortId::Mxp, PortId::Usb1, PortId::Usb2];

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<i32> for PortId {
    type Error = SerialError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(PortId::Onboard),
            1 => Ok(PortId::Mxp),
            2 => Ok(PortId::Usb1),
            3 => Ok(PortId::Usb2),
            other => Err(SerialError::InvalidPort(other)),
        }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortId::Onboard => write!(f, "Onboard"),
            PortId::Mxp => write!(f, "MXP"),
            PortId::Usb1 => write!(f, "USB1"),
            PortId::Usb2 => write!(f, "USB2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_id_from_raw() {
        for port in PortId::ALL {
            assert_eq!(PortId::try_from(port as i32).unwrap(), port);
        }
        assert!(matches!(
            PortId::try_from(4),
            Err(SerialError::InvalidPort(4))
        ));
        assert!(matches!(
            PortId::try_from(-1),
            Err(SerialError::InvalidPort(-1))
        ));
    }
}
