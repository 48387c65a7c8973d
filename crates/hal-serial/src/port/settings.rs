//! Line settings
//!
//! Typed values for every parameter a serial line can be configured with,
//! plus the range checks applied before anything reaches a device. The
//! integer conversions accept the codes used by the HAL C interface.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::SerialError;

/// Default baud rate for a freshly initialized port
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default size of the read and write buffers in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    /// 5 bits
    Five = 5,
    /// 6 bits
    Six = 6,
    /// 7 bits
    Seven = 7,
    /// 8 bits
    Eight = 8,
}

impl TryFrom<u8> for DataBits {
    type Error = SerialError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(SerialError::invalid(format!(
                "data bits must be 5, 6, 7 or 8, got {}",
                other
            ))),
        }
    }
}

impl TryFrom<i32> for DataBits {
    type Error = SerialError;

    fn try_from(bits: i32) -> Result<Self, Self::Error> {
        u8::try_from(bits)
            .map_err(|_| SerialError::invalid(format!("data bits out of range: {}", bits)))
            .and_then(DataBits::try_from)
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        bits as u8
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    None = 0,
    /// Odd parity
    Odd = 1,
    /// Even parity
    Even = 2,
    /// Parity bit always 1
    Mark = 3,
    /// Parity bit always 0
    Space = 4,
}

impl TryFrom<i32> for Parity {
    type Error = SerialError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Parity::None),
            1 => Ok(Parity::Odd),
            2 => Ok(Parity::Even),
            3 => Ok(Parity::Mark),
            4 => Ok(Parity::Space),
            other => Err(SerialError::invalid(format!("unknown parity code {}", other))),
        }
    }
}

/// Stop bits per character. The discriminants are tenths of a bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// 1 stop bit
    One = 10,
    /// 1.5 stop bits
    OnePointFive = 15,
    /// 2 stop bits
    Two = 20,
}

impl TryFrom<i32> for StopBits {
    type Error = SerialError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            10 => Ok(StopBits::One),
            15 => Ok(StopBits::OnePointFive),
            20 => Ok(StopBits::Two),
            other => Err(SerialError::invalid(format!(
                "unknown stop bits code {} (expected 10, 15 or 20)",
                other
            ))),
        }
    }
}

/// Flow control mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    /// No flow control
    None = 0,
    /// Software, XON/XOFF characters
    XonXoff = 1,
    /// Hardware, RTS/CTS lines
    RtsCts = 2,
    /// Hardware, DTR/DSR lines
    DtrDsr = 4,
}

impl TryFrom<i32> for FlowControl {
    type Error = SerialError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(FlowControl::None),
            1 => Ok(FlowControl::XonXoff),
            2 => Ok(FlowControl::RtsCts),
            4 => Ok(FlowControl::DtrDsr),
            other => Err(SerialError::invalid(format!(
                "unknown flow control code {}",
                other
            ))),
        }
    }
}

/// When written bytes are handed to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Every write goes straight to the device and is flushed
    FlushOnAccess = 1,
    /// Writes collect in the write buffer until it fills or `flush` is called
    FlushWhenFull = 2,
}

impl TryFrom<i32> for WriteMode {
    type Error = SerialError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(WriteMode::FlushOnAccess),
            2 => Ok(WriteMode::FlushWhenFull),
            other => Err(SerialError::invalid(format!("unknown write mode {}", other))),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::None => write!(f, "N"),
            Parity::Odd => write!(f, "O"),
            Parity::Even => write!(f, "E"),
            Parity::Mark => write!(f, "M"),
            Parity::Space => write!(f, "S"),
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopBits::One => write!(f, "1"),
            StopBits::OnePointFive => write!(f, "1.5"),
            StopBits::Two => write!(f, "2"),
        }
    }
}

/// Complete line configuration of a port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSettings {
    /// Symbols per second
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits per character
    pub stop_bits: StopBits,
    /// Flow control mechanism
    pub flow_control: FlowControl,
    /// Read timeout, written as fractional seconds in config files
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// When written bytes reach the device
    pub write_mode: WriteMode,
    /// Largest chunk taken from the device per device read
    pub read_buffer_size: usize,
    /// Capacity of the write buffer in [`WriteMode::FlushWhenFull`]
    pub write_buffer_size: usize,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: DEFAULT_TIMEOUT,
            write_mode: WriteMode::FlushOnAccess,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl LineSettings {
    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<(), SerialError> {
        validate_baud_rate(self.baud_rate)?;
        validate_buffer_size("read", self.read_buffer_size)?;
        validate_buffer_size("write", self.write_buffer_size)?;
        Ok(())
    }
}

impl fmt::Display for LineSettings {
    /// Formats the classic `9600 8N1` notation
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate, self.data_bits as u8, self.parity, self.stop_bits
        )
    }
}

/// Baud rates must be positive
pub fn validate_baud_rate(baud: u32) -> Result<u32, SerialError> {
    if baud == 0 {
        return Err(SerialError::invalid("baud rate must be positive"));
    }
    Ok(baud)
}

/// Buffer sizes must be positive
pub fn validate_buffer_size(which: &str, size: usize) -> Result<usize, SerialError> {
    if size == 0 {
        return Err(SerialError::invalid(format!(
            "{} buffer size must be positive",
            which
        )));
    }
    Ok(size)
}

/// Convert a timeout in seconds, rejecting negative, NaN and infinite values
pub fn timeout_from_secs(secs: f64) -> Result<Duration, SerialError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(SerialError::invalid(format!(
            "timeout must be a finite, non-negative number of seconds, got {}",
            secs
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| SerialError::invalid(format!("timeout out of range: {}", e)))
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        super::timeout_from_secs(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_bits_range() {
        for bits in 5..=8 {
            assert_eq!(u8::from(DataBits::try_from(bits as i32).unwrap()), bits);
        }
        for bad in [-1i32, 0, 4, 9, 256] {
            assert!(matches!(
                DataBits::try_from(bad),
                Err(SerialError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_hal_codes() {
        assert_eq!(Parity::try_from(3).unwrap(), Parity::Mark);
        assert!(Parity::try_from(5).is_err());
        assert_eq!(StopBits::try_from(15).unwrap(), StopBits::OnePointFive);
        assert!(StopBits::try_from(1).is_err());
        assert_eq!(FlowControl::try_from(4).unwrap(), FlowControl::DtrDsr);
        assert!(FlowControl::try_from(3).is_err());
        assert_eq!(WriteMode::try_from(2).unwrap(), WriteMode::FlushWhenFull);
        assert!(WriteMode::try_from(0).is_err());
    }

    #[test]
    fn test_timeout_from_secs() {
        assert_eq!(timeout_from_secs(0.0).unwrap(), Duration::ZERO);
        assert_eq!(timeout_from_secs(0.25).unwrap(), Duration::from_millis(250));
        assert!(timeout_from_secs(-0.1).is_err());
        assert!(timeout_from_secs(f64::NAN).is_err());
        assert!(timeout_from_secs(f64::INFINITY).is_err());
    }

    #[test]
    fn test_defaults_display() {
        let settings = LineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.to_string(), "9600 8N1");
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let settings = LineSettings {
            write_buffer_size: 0,
            ..LineSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(validate_baud_rate(0).is_err());
    }
}
