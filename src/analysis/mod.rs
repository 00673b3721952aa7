//! Spectral analysis of the sampled AC voltage.
//!
//! One cycle: acquire a block of raw codes, calibrate to volts, remove the mean, apply the
//! flat-top window, transform, and extract tone, distortion and noise metrics. All buffers are
//! allocated once in [`Analyzer`] and reused every cycle.

use core::fmt::Debug;
use num_complex::Complex32;

use crate::adc::{self, AdcSource, SampleBlock, VoltageBlock};
use crate::config::AnalysisConfig;
use crate::temp::{self, TemperatureSource};
use crate::NFFT;

pub mod metrics;
pub mod window;

pub use metrics::{Metrics, PowerSpectrum, Quality};
pub use window::Window;

/// Bins `0..=NFFT/2` of the real transform, DC and Nyquist are real.
pub type Spectrum = [Complex32; NFFT / 2 + 1];

#[derive(Debug, defmt::Format)]
pub enum AnalysisError<E: Debug> {
    /// The ADC block read failed, the previous voltage block is kept.
    AcquisitionFailed(E),
}

/// Subtract the mean of `volts` and apply the window into `out`. Returns the mean.
pub fn detrend_window(volts: &VoltageBlock, window: &Window, out: &mut [f32; NFFT]) -> f32 {
    let mean = (volts.iter().map(|v| *v as f64).sum::<f64>() / NFFT as f64) as f32;

    for ((o, v), w) in out.iter_mut().zip(volts).zip(window.coefficients()) {
        *o = (v - mean) * w;
    }

    mean
}

/// Forward real transform of `buf` (destroyed) into `spectrum`.
pub fn transform(buf: &mut [f32; NFFT], spectrum: &mut Spectrum) {
    let out = microfft::real::rfft_4096(buf);

    // The real Nyquist coefficient is packed into the imaginary part of DC.
    let nyquist = out[0].im;

    spectrum[..NFFT / 2].copy_from_slice(&out[..]);
    spectrum[0].im = 0.0;
    spectrum[NFFT / 2] = Complex32::new(nyquist, 0.0);
}

pub struct Analyzer {
    pub config: AnalysisConfig,
    window: Window,
    raw: SampleBlock,
    volts: VoltageBlock,
    work: [f32; NFFT],
    spectrum: Spectrum,
    power: PowerSpectrum,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig) -> Analyzer {
        defmt::debug!("analysis: setting up window and buffers: {}", config);

        Analyzer {
            config,
            window: Window::new(),
            raw: [0; 2 * NFFT],
            volts: [0.0; NFFT],
            work: [0.0; NFFT],
            spectrum: [Complex32::new(0.0, 0.0); NFFT / 2 + 1],
            power: [0.0; NFFT / 2],
        }
    }

    /// Read a new block and calibrate it. On failure the previous voltage block is kept.
    /// Returns the number of codes that could not be calibrated.
    pub fn acquire<A: AdcSource>(&mut self, adc: &mut A) -> Result<usize, AnalysisError<A::Error>> {
        adc.read_block(&mut self.raw).map_err(|e| {
            defmt::error!("analysis: could not read adc block: {:?}", e);
            AnalysisError::AcquisitionFailed(e)
        })?;

        Ok(adc::calibrate(
            adc,
            &self.raw,
            self.config.divider_scale,
            &mut self.volts,
        ))
    }

    /// Analyze the current voltage block. `temperature` is not set.
    pub fn analyze(&mut self) -> Metrics {
        let mean = detrend_window(&self.volts, &self.window, &mut self.work);
        transform(&mut self.work, &mut self.spectrum);
        metrics::power_spectrum(&self.spectrum, &mut self.power);

        metrics::extract(
            &self.spectrum,
            &self.power,
            &self.window,
            mean,
            &self.config,
        )
    }

    /// A full analysis cycle: acquire, analyze and attach the temperature.
    pub fn cycle<A: AdcSource, T: TemperatureSource>(
        &mut self,
        adc: &mut A,
        sensor: &mut T,
    ) -> Result<Metrics, AnalysisError<A::Error>> {
        self.acquire(adc)?;

        let mut m = self.analyze();
        m.temperature = temp::read_best_effort(sensor);

        defmt::info!("analysis: {}", m);

        Ok(m)
    }

    pub fn bin_width(&self) -> f32 {
        self.config.sample_rate / NFFT as f32
    }

    pub fn volts(&self) -> &VoltageBlock {
        &self.volts
    }
}
