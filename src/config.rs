//! Build-time and runtime configuration.
//!
//! The constants are generated by `build.rs` from environment variables at build time
//! (`SAMPLE_RATE`, `PWM_FREQ`, `CYCLE_FREQ`, `DUTY_AVG`, `DUTY_RANGE`, `DEADTIME_NS`,
//! `MAX_HARMONIC`), the structs carry them at runtime so tests and the simulator can vary them.

include!(concat!(env!("OUT_DIR"), "/config.rs"));

use crate::STEPS;

/// Scale factor from millivolts at the ADC pin to volts on the line: 2 * 820k / 6.8k * 1e-3.
pub const VOLTAGE_DIVIDER_SF: f32 = 0.241;

/// Peaks below this bin are flagged as low-confidence.
pub const MIN_PEAK_BIN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, defmt::Format)]
pub struct AnalysisConfig {
    /// Sample rate of one channel [Hz].
    pub sample_rate: f32,

    /// Volts per millivolt at the ADC pin.
    pub divider_scale: f32,

    /// Highest harmonic included in the distortion sum.
    pub max_harmonic: usize,

    pub min_peak_bin: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            sample_rate: SAMPLE_RATE,
            divider_scale: VOLTAGE_DIVIDER_SF,
            max_harmonic: MAX_HARMONIC,
            min_peak_bin: MIN_PEAK_BIN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, defmt::Format)]
pub struct PwmConfig {
    /// PWM carrier frequency [Hz].
    pub carrier_hz: u32,

    /// Frequency of the synthesized output waveform [Hz].
    pub cycle_freq: f32,

    pub dead_time_ns: u32,

    /// Mean duty cycle of the high side switch, 0 to 1.
    pub duty_average: f32,

    /// Relative swing around `duty_average`, 0 to 1.
    pub duty_range: f32,
}

impl Default for PwmConfig {
    fn default() -> Self {
        PwmConfig {
            carrier_hz: PWM_FREQ,
            cycle_freq: CYCLE_FREQ,
            dead_time_ns: DEADTIME_NS,
            duty_average: DUTY_AVG,
            duty_range: DUTY_RANGE,
        }
    }
}

impl PwmConfig {
    /// Carrier period [ns].
    pub fn period_ns(&self) -> u32 {
        1_000_000_000 / self.carrier_hz
    }

    /// Interval between sequencer steps [us].
    pub fn step_period_us(&self) -> u32 {
        libm::roundf(1.0e6 / (self.cycle_freq * STEPS as f32)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_periods() {
        let c = PwmConfig::default();
        assert_eq!(c.period_ns(), 100_000);
        assert_eq!(c.step_period_us(), 18519);
    }

    #[test]
    fn default_analysis() {
        let c = AnalysisConfig::default();
        assert_eq!(c.max_harmonic, 50);
        assert_eq!(c.min_peak_bin, 5);
        approx::assert_abs_diff_eq!(c.sample_rate, 16340.4, epsilon = 1e-2);
    }
}
