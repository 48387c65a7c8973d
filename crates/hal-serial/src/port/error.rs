//! Serial port errors

use std::io;

use thiserror::Error;

use super::PortId;

/// Errors that can occur while managing or using a serial port
#[derive(Error, Debug)]
pub enum SerialError {
    /// No session exists for the port
    #[error("Serial port {0} is not open")]
    NotOpen(PortId),

    /// The port already has a session
    #[error("Serial port {0} is already open")]
    AlreadyOpen(PortId),

    /// Raw port number outside the known ports
    #[error("Invalid serial port identifier: {0}")]
    InvalidPort(i32),

    /// Value out of range or not supported by the device
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The device behind the port could not be opened
    #[error("Serial port {port} unavailable: {reason}")]
    DeviceUnavailable {
        /// Port being opened
        port: PortId,
        /// Why the open failed
        reason: String,
    },

    /// The device did not finish in time
    #[error("Serial operation timed out")]
    Timeout,

    /// Transport fault
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file unreadable or invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Status-code category of a [`SerialError`], as reported across the C ABI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `-1`
    NotOpen,
    /// `-2`
    AlreadyOpen,
    /// `-3`
    InvalidPort,
    /// `-4`
    InvalidArgument,
    /// `-5`
    DeviceUnavailable,
    /// `-6`
    Timeout,
    /// `-7`
    Io,
    /// `-8`
    Config,
}

impl ErrorKind {
    /// Negative status code for this kind
    pub const fn status_code(self) -> i32 {
        match self {
            ErrorKind::NotOpen => -1,
            ErrorKind::AlreadyOpen => -2,
            ErrorKind::InvalidPort => -3,
            ErrorKind::InvalidArgument => -4,
            ErrorKind::DeviceUnavailable => -5,
            ErrorKind::Timeout => -6,
            ErrorKind::Io => -7,
            ErrorKind::Config => -8,
        }
    }

    /// Map a status code back to its kind. `0` and unknown codes yield `None`.
    pub fn from_status(status: i32) -> Option<Self> {
        match status {
            -1 => Some(ErrorKind::NotOpen),
            -2 => Some(ErrorKind::AlreadyOpen),
            -3 => Some(ErrorKind::InvalidPort),
            -4 => Some(ErrorKind::InvalidArgument),
            -5 => Some(ErrorKind::DeviceUnavailable),
            -6 => Some(ErrorKind::Timeout),
            -7 => Some(ErrorKind::Io),
            -8 => Some(ErrorKind::Config),
            _ => None,
        }
    }
}

impl SerialError {
    /// Shorthand for an [`SerialError::InvalidArgument`] with a message
    pub fn invalid(msg: impl Into<String>) -> Self {
        SerialError::InvalidArgument(msg.into())
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SerialError::NotOpen(_) => ErrorKind::NotOpen,
            SerialError::AlreadyOpen(_) => ErrorKind::AlreadyOpen,
            SerialError::InvalidPort(_) => ErrorKind::InvalidPort,
            SerialError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SerialError::DeviceUnavailable { .. } => ErrorKind::DeviceUnavailable,
            SerialError::Timeout => ErrorKind::Timeout,
            SerialError::Io(_) => ErrorKind::Io,
            SerialError::Config(_) => ErrorKind::Config,
        }
    }

    /// Negative status code reported through the C ABI
    pub fn status_code(&self) -> i32 {
        self.kind().status_code()
    }

    /// Classify an error coming back from a transport.
    ///
    /// Devices reject settings they cannot express with `Unsupported` or
    /// `InvalidInput`; those are argument errors, everything else is a
    /// transport fault.
    pub(crate) fn from_transport(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::Unsupported | io::ErrorKind::InvalidInput => {
                SerialError::InvalidArgument(err.to_string())
            }
            io::ErrorKind::TimedOut => SerialError::Timeout,
            _ => SerialError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_negative_and_distinct() {
        let kinds = [
            ErrorKind::NotOpen,
            ErrorKind::AlreadyOpen,
            ErrorKind::InvalidPort,
            ErrorKind::InvalidArgument,
            ErrorKind::DeviceUnavailable,
            ErrorKind::Timeout,
            ErrorKind::Io,
            ErrorKind::Config,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.status_code()).collect();
        assert!(codes.iter().all(|&c| c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());

        for kind in kinds {
            assert_eq!(ErrorKind::from_status(kind.status_code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_status(0), None);
        assert_eq!(ErrorKind::from_status(-1000), None);
    }

    #[test]
    fn test_transport_error_classification() {
        let unsupported = io::Error::new(io::ErrorKind::Unsupported, "mark parity");
        assert_eq!(
            SerialError::from_transport(unsupported).kind(),
            ErrorKind::InvalidArgument
        );

        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "drain");
        assert_eq!(
            SerialError::from_transport(timed_out).kind(),
            ErrorKind::Timeout
        );

        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "unplugged");
        assert_eq!(SerialError::from_transport(broken).kind(), ErrorKind::Io);
    }

    #[test]
    fn test_error_display() {
        let err = SerialError::AlreadyOpen(PortId::Mxp);
        assert_eq!(err.to_string(), "Serial port MXP is already open");
        let err = SerialError::InvalidPort(7);
        assert!(err.to_string().contains('7'));
    }
}
