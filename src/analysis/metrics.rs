//! Tone, harmonic distortion and noise floor from a windowed power spectrum.

use num_complex::Complex32;

use super::window::Window;
use crate::config::AnalysisConfig;
use crate::NFFT;

/// Power per bin [V^2] (not a density), DC forced to zero.
pub type PowerSpectrum = [f32; NFFT / 2];

/// Confidence in a set of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format, serde::Serialize)]
pub enum Quality {
    Good,

    /// The peak is so close to DC that it is probably a low-frequency artifact.
    LowPeak,

    /// The peak is so low that tone and harmonics cannot be separated from the noise, no noise
    /// estimate is made.
    Degenerate,
}

#[derive(Debug, Clone, Copy, PartialEq, defmt::Format, serde::Serialize)]
pub struct Metrics {
    /// Mean of the block before windowing [V].
    pub mean_dc: f32,

    /// Bin of the tone.
    pub tone_bin: u32,

    /// [Hz]
    pub tone_frequency: f32,

    /// [V rms]
    pub tone_amplitude_rms: f32,

    /// [rad]
    pub tone_phase: f32,

    /// Harmonic distortion with the noise background subtracted [%].
    pub thd_percent: f32,

    /// [V / sqrt(Hz)]
    pub noise_density: f32,

    /// Number of harmonics summed.
    pub harmonics: u32,

    /// Number of bins in the noise estimate.
    pub noise_bins: u32,

    /// Die temperature [C], if it could be read.
    pub temperature: Option<f32>,

    pub quality: Quality,
}

/// `|X|^2` of bins `1..NFFT/2`, bin 0 set to zero.
pub fn power_spectrum(bins: &[Complex32], ps: &mut PowerSpectrum) {
    ps[0] = 0.0;

    for (p, b) in ps.iter_mut().zip(bins).skip(1) {
        *p = b.norm_sqr();
    }
}

/// Index of the (first) maximum.
pub fn peak(ps: &PowerSpectrum) -> usize {
    ps.iter()
        .enumerate()
        .fold((0, f32::MIN), |(mi, mv), (i, v)| if *v > mv { (i, *v) } else { (mi, mv) })
        .0
}

/// Sum of the power at the harmonics `k * m` for `k = 2..=max_harmonic` below Nyquist. Returns
/// the sum and the number of harmonics included.
pub fn harmonic_power(ps: &PowerSpectrum, m: usize, max_harmonic: usize) -> (f32, usize) {
    let mut power = 0.0;
    let mut k = 2;

    while k <= max_harmonic {
        if k * m >= ps.len() {
            break;
        }

        power += ps[k * m];
        k += 1;
    }

    (power, k - 2)
}

/// Sum of the power in bins that are not within two bins of a multiple of `m`. Returns the sum
/// and the number of bins included, or `None` when the exclusion leaves no bins (`m <= 5`).
pub fn noise_power(ps: &PowerSpectrum, m: usize) -> Option<(f64, usize)> {
    if m <= 2 {
        return None;
    }

    let mut power = 0.0f64;
    let mut bins = 0;

    for (i, p) in ps.iter().enumerate() {
        let r = i % m;

        if r == m - 2 || r == m - 1 || r == 0 || r == 1 || r == 2 {
            continue;
        }

        power += *p as f64;
        bins += 1;
    }

    if bins == 0 {
        None
    } else {
        Some((power, bins))
    }
}

/// Extract metrics from the spectrum of a windowed block. `temperature` is left `None`.
pub fn extract(
    bins: &[Complex32],
    ps: &PowerSpectrum,
    window: &Window,
    mean_dc: f32,
    config: &AnalysisConfig,
) -> Metrics {
    let bin_width = config.sample_rate / NFFT as f32;

    let m = peak(ps);
    let mut quality = Quality::Good;

    if m < config.min_peak_bin {
        defmt::warn!(
            "metrics: max power index {} too small, results will be wrong",
            m
        );
        quality = Quality::LowPeak;
    }

    let tone_power = ps[m];
    let tone = bins[m];

    let (harmonic_power, harmonics) = if m > 0 {
        harmonic_power(ps, m, config.max_harmonic)
    } else {
        (0.0, 0)
    };

    let (thd_power, noise_density, noise_bins) = match noise_power(ps, m) {
        Some((noise, noise_bins)) => {
            // Subtract the white noise background expected in the harmonic bins.
            let background = harmonics as f64 * noise / noise_bins as f64;
            let thd_power = (harmonic_power as f64 - background).max(0.0) as f32;

            let density = libm::sqrt(
                2. * noise
                    / (bin_width as f64 * noise_bins as f64 * window.sum_sq as f64),
            ) as f32;

            (thd_power, density, noise_bins)
        }
        None => {
            defmt::warn!("metrics: peak at bin {}, cannot estimate noise", m);
            quality = Quality::Degenerate;

            (harmonic_power, f32::NAN, 0)
        }
    };

    let thd_percent = if tone_power > 0.0 {
        100. * libm::sqrtf(thd_power / tone_power)
    } else {
        f32::NAN
    };

    Metrics {
        mean_dc,
        tone_bin: m as u32,
        tone_frequency: bin_width * m as f32,
        tone_amplitude_rms: libm::sqrtf(2. * tone_power / (window.sum * window.sum)),
        tone_phase: libm::atan2f(tone.im, tone.re),
        thd_percent,
        noise_density,
        harmonics: harmonics as u32,
        noise_bins: noise_bins as u32,
        temperature: None,
        quality,
    }
}

impl core::fmt::Display for Metrics {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "DC {:.2} Tone: {:.2} Hz mag {:.2} Vrms phase {:.3} rad THD {:.2}% rms noise {:.2e} V/rtHz",
            self.mean_dc,
            self.tone_frequency,
            self.tone_amplitude_rms,
            self.tone_phase,
            self.thd_percent,
            self.noise_density,
        )?;

        match self.temperature {
            Some(t) => write!(f, " {:.2} C", t)?,
            None => write!(f, " n/a C")?,
        }

        match self.quality {
            Quality::Good => Ok(()),
            Quality::LowPeak => write!(f, " (low peak)"),
            Quality::Degenerate => write!(f, " (degenerate)"),
        }
    }
}
