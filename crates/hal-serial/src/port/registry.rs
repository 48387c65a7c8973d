//! Port registry
//!
//! Owns the sessions of the fixed set of ports. There is no global table:
//! whoever needs serial access holds a [`Registry`] and passes it around.
//!
//! Each session sits behind its own lock, so a read blocked on one port
//! never holds up another port.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use super::discovery;
use super::settings::LineSettings;
use super::transport::{SerialTransport, Transport};
use super::{PortId, Session, SerialError};
use crate::config::DevicePaths;

/// Opens the device behind a port
pub trait PortOpener: Send {
    /// Open the device for `port`, configured with `settings`
    fn open(
        &mut self,
        port: PortId,
        settings: &LineSettings,
    ) -> Result<Box<dyn Transport>, SerialError>;
}

/// Opens real serial devices through the OS
#[derive(Debug, Clone, Default)]
pub struct SystemOpener {
    devices: DevicePaths,
}

impl SystemOpener {
    /// Opener for the given device paths
    pub fn new(devices: DevicePaths) -> Self {
        Self { devices }
    }

    /// Device path for `port`. Unconfigured USB ports fall back to discovery.
    pub fn resolve(&self, port: PortId) -> Option<String> {
        if let Some(path) = self.devices.path(port) {
            return Some(path.to_string());
        }
        match port {
            PortId::Usb1 => discovery::usb_device(0),
            PortId::Usb2 => discovery::usb_device(1),
            PortId::Onboard | PortId::Mxp => None,
        }
    }
}

impl PortOpener for SystemOpener {
    fn open(
        &mut self,
        port: PortId,
        settings: &LineSettings,
    ) -> Result<Box<dyn Transport>, SerialError> {
        let device = self
            .resolve(port)
            .ok_or_else(|| SerialError::DeviceUnavailable {
                port,
                reason: "no device configured or discovered".to_string(),
            })?;

        let transport =
            SerialTransport::open(&device, settings).map_err(|e| SerialError::DeviceUnavailable {
                port,
                reason: format!("{}: {}", device, e),
            })?;
        info!(%port, device = %device, "opened serial device");
        Ok(Box::new(transport))
    }
}

/// Exclusive access to an open session
pub type SessionGuard<'a> = MutexGuard<'a, Session>;

pub(crate) type SharedSession = Arc<Mutex<Session>>;

fn lock_session(shared: &SharedSession) -> SessionGuard<'_> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// The open sessions, at most one per port
pub struct Registry {
    opener: Box<dyn PortOpener>,
    defaults: LineSettings,
    sessions: [Option<SharedSession>; PortId::COUNT],
}

impl Registry {
    /// Registry opening devices through `opener` with default line settings
    pub fn new(opener: impl PortOpener + 'static) -> Self {
        Self::with_defaults(opener, LineSettings::default())
    }

    /// Registry whose new sessions start from `defaults`
    pub fn with_defaults(opener: impl PortOpener + 'static, defaults: LineSettings) -> Self {
        Self {
            opener: Box::new(opener),
            defaults,
            sessions: Default::default(),
        }
    }

    /// Settings applied to newly initialized ports
    pub fn defaults(&self) -> &LineSettings {
        &self.defaults
    }

    /// Open `port`.
    ///
    /// Fails with [`SerialError::AlreadyOpen`] when the port already has a
    /// session, and with [`SerialError::DeviceUnavailable`] when the device
    /// cannot be opened.
    pub fn initialize(&mut self, port: PortId) -> Result<SessionGuard<'_>, SerialError> {
        if self.sessions[port.index()].is_some() {
            return Err(SerialError::AlreadyOpen(port));
        }
        self.defaults.validate()?;

        let transport = self.opener.open(port, &self.defaults).map_err(|e| match e {
            SerialError::DeviceUnavailable { .. } => e,
            other => SerialError::DeviceUnavailable {
                port,
                reason: other.to_string(),
            },
        })?;

        info!(%port, settings = %self.defaults, "serial port initialized");
        let session = Session::new(port, transport, self.defaults.clone());
        let shared = self.sessions[port.index()].insert(Arc::new(Mutex::new(session)));
        Ok(lock_session(shared))
    }

    /// Close `port`, releasing its device.
    ///
    /// Buffered output is flushed first; if that fails the bytes are dropped
    /// and the device is released anyway.
    pub fn close(&mut self, port: PortId) -> Result<(), SerialError> {
        let shared = self.detach(port)?;
        Self::release(port, shared);
        Ok(())
    }

    /// Remove the session of `port` without touching its device
    pub(crate) fn detach(&mut self, port: PortId) -> Result<SharedSession, SerialError> {
        self.sessions[port.index()]
            .take()
            .ok_or(SerialError::NotOpen(port))
    }

    /// Finish a detached session. Waits for any call still running on it.
    pub(crate) fn release(port: PortId, shared: SharedSession) {
        let mut session = lock_session(&shared);
        if let Err(e) = session.finish() {
            warn!(
                %port,
                dropped = session.buffered_output(),
                "discarding buffered output on close: {e}"
            );
            session.discard_output();
        }
        session.mark_closed();
        drop(session);
        drop(shared);
        info!(%port, "serial port closed");
    }

    /// Close every open port
    pub fn close_all(&mut self) {
        for port in self.open_ports() {
            // only open ports are listed, close cannot report NotOpen here
            let _ = self.close(port);
        }
    }

    /// Whether `port` has a session
    pub fn is_open(&self, port: PortId) -> bool {
        self.sessions[port.index()].is_some()
    }

    /// Ports that currently have a session
    pub fn open_ports(&self) -> Vec<PortId> {
        PortId::ALL
            .into_iter()
            .filter(|&p| self.is_open(p))
            .collect()
    }

    /// Session of an open port, for configuration and I/O.
    ///
    /// Blocks while another thread is using the same port.
    pub fn session(&self, port: PortId) -> Result<SessionGuard<'_>, SerialError> {
        self.shared(port).map(lock_session)
    }

    /// The lockable session of `port`, usable after the registry is released
    pub(crate) fn shared(&self, port: PortId) -> Result<&SharedSession, SerialError> {
        self.sessions[port.index()]
            .as_ref()
            .ok_or(SerialError::NotOpen(port))
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("defaults", &self.defaults)
            .field("open", &self.open_ports())
            .finish()
    }
}
