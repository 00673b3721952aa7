//! Complementary PWM output with dead time.
//!
//! Three timer outputs are driven: a reference output following the raw pulse width, and the
//! high/low side switches of a half bridge. The low side runs with inverted polarity and both
//! sides are offset by the dead time so the switches never conduct at the same time.

use core::fmt::Debug;

pub mod sequencer;
pub mod table;

pub use sequencer::Sequencer;
pub use table::WaveformTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Channel {
    /// Undelayed pulse, for monitoring.
    Reference,

    LowSide,
    HighSide,
}

impl Channel {
    /// De-energizing order: the switches before the reference.
    pub const ZERO_ORDER: [Channel; 3] = [Channel::HighSide, Channel::LowSide, Channel::Reference];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Polarity {
    Normal,
    Inverted,
}

/// A set of PWM timer outputs.
pub trait PwmSink {
    type Error: Debug + defmt::Format;

    /// Program `channel` with a carrier at `carrier_hz` and a pulse of `pulse_ns`. A pulse of
    /// zero with normal polarity keeps the output low.
    fn set(
        &mut self,
        channel: Channel,
        carrier_hz: u32,
        pulse_ns: u32,
        polarity: Polarity,
    ) -> Result<(), Self::Error>;
}
