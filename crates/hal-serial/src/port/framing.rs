//! Read termination
//!
//! A port may carry one terminator byte. While it is enabled, reads end as
//! soon as the terminator has been delivered.

/// Terminator used when none is given explicitly
pub const DEFAULT_TERMINATOR: u8 = b'\n';

/// Termination state of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Termination {
    terminator: Option<u8>,
}

impl Termination {
    /// Termination disabled
    pub const fn disabled() -> Self {
        Self { terminator: None }
    }

    /// Stop reads at `byte`
    pub fn enable(&mut self, byte: u8) {
        self.terminator = Some(byte);
    }

    /// Stop looking for a terminator
    pub fn disable(&mut self) {
        self.terminator = None;
    }

    /// Whether a terminator is set
    pub fn is_enabled(&self) -> bool {
        self.terminator.is_some()
    }

    /// The active terminator, if any
    pub fn terminator(&self) -> Option<u8> {
        self.terminator
    }

    /// Length of the frame at the start of `data` that a read may deliver,
    /// capped at `limit`. The frame includes the terminator when one is found.
    pub fn frame_len(&self, data: &[u8], limit: usize) -> usize {
        let window = &data[..data.len().min(limit)];
        match self.terminator {
            Some(t) => window
                .iter()
                .position(|&b| b == t)
                .map_or(window.len(), |i| i + 1),
            None => window.len(),
        }
    }

    /// Whether `frame` ends with the active terminator
    pub fn completes(&self, frame: &[u8]) -> bool {
        matches!((self.terminator, frame.last()), (Some(t), Some(&last)) if t == last)
    }
}
