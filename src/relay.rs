//! Adapter between a remote control link and the inverter.
//!
//! The link exposes a one-byte writable state (on/off) and a readable value (the measured tone
//! frequency in mHz). Writes are turned into events on [`Control`], reads come from the last
//! published [`Metrics`].

use core::sync::atomic::{AtomicI32, Ordering};

use crate::analysis::Metrics;
use crate::safety::{Control, InverterError, TripReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum RelayError {
    /// The written value is not exactly one byte.
    InvalidLength,

    /// Writes must start at offset 0.
    InvalidOffset,

    /// The state byte must be 0 or 1.
    ValueNotAllowed,

    /// The request could not be queued, try again.
    Busy,
}

/// Latest analysis results for the link.
pub struct Telemetry {
    frequency_mhz: AtomicI32,
}

impl Telemetry {
    pub const fn new() -> Telemetry {
        Telemetry {
            frequency_mhz: AtomicI32::new(0),
        }
    }

    pub fn publish(&self, m: &Metrics) {
        let mhz = libm::roundf(m.tone_frequency * 1000.) as i32;
        self.frequency_mhz.store(mhz, Ordering::Relaxed);
    }

    /// Tone frequency [mHz].
    pub fn frequency_mhz(&self) -> i32 {
        self.frequency_mhz.load(Ordering::Relaxed)
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Telemetry::new()
    }
}

pub struct Relay<'a> {
    control: &'a Control,
    telemetry: &'a Telemetry,
}

impl<'a> Relay<'a> {
    pub fn new(control: &'a Control, telemetry: &'a Telemetry) -> Relay<'a> {
        Relay { control, telemetry }
    }

    /// Handle a write to the state value. Returns the number of bytes consumed.
    pub fn write_state(&self, buf: &[u8], offset: u16) -> Result<usize, RelayError> {
        if buf.len() != 1 {
            return Err(RelayError::InvalidLength);
        }

        if offset != 0 {
            return Err(RelayError::InvalidOffset);
        }

        match buf[0] {
            1 => {
                defmt::info!("relay: on requested");
                self.control.request_on().map_err(|e| match e {
                    InverterError::QueueFull => RelayError::Busy,
                    InverterError::InvalidDuty => RelayError::ValueNotAllowed,
                })?;
            }
            0 => {
                defmt::info!("relay: off requested");
                self.control.trip(TripReason::Requested);
            }
            v => {
                defmt::warn!("relay: invalid state: {}", v);
                return Err(RelayError::ValueNotAllowed);
            }
        }

        Ok(buf.len())
    }

    /// Tone frequency [mHz].
    pub fn read_value(&self) -> i32 {
        self.telemetry.frequency_mhz()
    }

    /// The link went away: always de-energize.
    pub fn disconnected(&self) {
        defmt::warn!("relay: disconnected");
        self.control.trip(TripReason::Disconnected);
    }
}
