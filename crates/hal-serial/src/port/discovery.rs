//! Device discovery
//!
//! Enumerates the serial devices the OS knows about. USB1 and USB2 map to the
//! first and second USB serial adapter in the order produced here when no
//! device path is configured for them.

use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;

/// Information about an available serial device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device path (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// Whether the device sits behind a USB adapter
    pub usb: bool,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for DeviceInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => Self {
                name: info.port_name,
                usb: true,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                product: usb_info.product,
            },
            _ => {
                let usb = looks_like_usb(&info.port_name);
                Self {
                    name: info.port_name,
                    usb,
                    vid: None,
                    pid: None,
                    product: None,
                }
            }
        }
    }
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn looks_like_usb(name: &str) -> bool {
    let base = basename(name);
    base.starts_with("ttyACM") || base.starts_with("ttyUSB")
}

/// Sort key placing ttyACM* first, then ttyUSB*, both numerically by suffix,
/// then everything else by name
fn device_sort_key(name: &str) -> (u8, usize, String) {
    let base = basename(name);
    if let Some(rest) = base.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, base.to_string());
    }
    if let Some(rest) = base.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, base.to_string());
    }
    (2, 0, base.to_string())
}

fn sort_devices(devices: &mut [DeviceInfo]) {
    devices.sort_by_key(|d| device_sort_key(&d.name));
}

/// List all available serial devices, with /dev fallbacks and deterministic ordering
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut map: HashMap<String, DeviceInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let device = DeviceInfo::from(info);
                map.entry(device.name.clone()).or_insert(device);
            }
        }
        Err(e) => tracing::debug!("serial port enumeration failed: {e}"),
    }

    // udev-less systems: the enumeration API can miss adapters that exist in /dev
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if looks_like_usb(fname) {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| DeviceInfo {
                        name: full,
                        usb: true,
                        vid: None,
                        pid: None,
                        product: None,
                    });
                }
            }
        }
    }

    let mut devices: Vec<DeviceInfo> = map.into_values().collect();
    sort_devices(&mut devices);
    devices
}

/// Path of the `index`-th USB serial adapter (zero-based)
pub fn usb_device(index: usize) -> Option<String> {
    nth_usb(list_devices(), index)
}

fn nth_usb(devices: Vec<DeviceInfo>, index: usize) -> Option<String> {
    devices
        .into_iter()
        .filter(|d| d.usb)
        .nth(index)
        .map(|d| d.name)
}
