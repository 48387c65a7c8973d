//! Configuration
//!
//! A JSON file naming the device behind each port and the line settings new
//! sessions start with. Every field is optional:
//!
//! ```json
//! {
//!   "devices": { "onboard": "/dev/ttyS0", "usb1": "/dev/ttyACM0" },
//!   "defaults": { "baud_rate": 115200, "parity": "even", "timeout": 0.5 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::port::{LineSettings, PortId, SerialError};

/// Environment variable holding the path of the configuration file
pub const CONFIG_ENV_VAR: &str = "HAL_SERIAL_CONFIG";

/// Device paths for each port. USB ports left unset are discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicePaths {
    /// Onboard UART
    pub onboard: Option<String>,
    /// UART on the MXP expansion port
    pub mxp: Option<String>,
    /// First USB serial adapter
    pub usb1: Option<String>,
    /// Second USB serial adapter
    pub usb2: Option<String>,
}

impl Default for DevicePaths {
    fn default() -> Self {
        Self {
            onboard: Some("/dev/ttyS0".to_string()),
            mxp: Some("/dev/ttyS1".to_string()),
            usb1: None,
            usb2: None,
        }
    }
}

impl DevicePaths {
    /// Configured path for `port`
    pub fn path(&self, port: PortId) -> Option<&str> {
        match port {
            PortId::Onboard => self.onboard.as_deref(),
            PortId::Mxp => self.mxp.as_deref(),
            PortId::Usb1 => self.usb1.as_deref(),
            PortId::Usb2 => self.usb2.as_deref(),
        }
    }
}

/// Serial subsystem configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device behind each port
    pub devices: DevicePaths,
    /// Line settings new sessions start from
    pub defaults: LineSettings,
}

impl SerialConfig {
    /// Parse a configuration from JSON text
    pub fn from_json(content: &str) -> Result<Self, SerialError> {
        let config: SerialConfig = serde_json::from_str(content)
            .map_err(|e| SerialError::Config(format!("invalid configuration: {}", e)))?;
        config.defaults.validate().map_err(|e| {
            SerialError::Config(format!("invalid default line settings: {}", e))
        })?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SerialError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SerialError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Load the file named by `HAL_SERIAL_CONFIG`, or the defaults when unset
    pub fn from_env() -> Result<Self, SerialError> {
        match env::var_os(CONFIG_ENV_VAR) {
            Some(path) => {
                tracing::debug!("loading serial configuration from {:?}", path);
                Self::load(path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SerialError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| SerialError::Config(format!("failed to serialize: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}
