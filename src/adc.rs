//! Acquisition and calibration of the dual-channel AC voltage samples.
//!
//! The ADC sequence samples two channels interleaved: the sense voltage behind the divider on
//! channel 0, and the supply reference on channel 1. The line voltage is the sense voltage
//! relative to half the supply.

use core::fmt::Debug;

use crate::NFFT;

/// Raw interleaved codes of one acquisition: `[v0, vdd, v0, vdd, ..]`.
pub type SampleBlock = [u16; 2 * NFFT];

/// Calibrated line voltage [V].
pub type VoltageBlock = [f32; NFFT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Channel {
    /// Sense voltage behind the divider.
    Sense = 0,

    /// Supply reference.
    Reference = 1,
}

/// A blocking dual-channel ADC.
pub trait AdcSource {
    type Error: Debug + defmt::Format;

    /// Fill `raw` with one interleaved block. Blocks for the conversion time of the sequence.
    fn read_block(&mut self, raw: &mut SampleBlock) -> Result<(), Self::Error>;

    /// Convert a raw code from `channel` to millivolts using the channel calibration.
    fn raw_to_millivolts(&self, channel: Channel, raw: u16) -> Result<i32, Self::Error>;
}

/// Convert a raw block into volts. A code that cannot be converted is used as is (the
/// calibration is close to 1 mV per code), the number of such failures is returned.
pub fn calibrate<A: AdcSource>(
    adc: &A,
    raw: &SampleBlock,
    scale: f32,
    volts: &mut VoltageBlock,
) -> usize {
    let mut failures = 0;

    let mut to_mv = |channel, code: u16| match adc.raw_to_millivolts(channel, code) {
        Ok(mv) => mv,
        Err(_) => {
            failures += 1;
            code as i32
        }
    };

    for (v, pair) in volts.iter_mut().zip(raw.chunks_exact(2)) {
        let v0_mv = to_mv(Channel::Sense, pair[0]);
        let vdd_mv = to_mv(Channel::Reference, pair[1]);

        *v = scale * (v0_mv - vdd_mv / 2) as f32;
    }

    if failures > 0 {
        defmt::warn!("adc: {} codes could not be converted to mV", failures);
    }

    failures
}
