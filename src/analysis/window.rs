//! HFT95 flat-top window.
//!
//! Amplitude is accurate to about 0.05% regardless of where the tone falls between bins, at
//! the cost of a main lobe about 4 bins wide.

use crate::NFFT;

const A: [f32; 5] = [1.0, 1.9383379, 1.3045202, 0.4028270, 0.0350665];

pub struct Window {
    w: [f32; NFFT],

    /// Sum of the coefficients, normalizes amplitudes.
    pub sum: f32,

    /// Sum of the squared coefficients, normalizes power densities.
    pub sum_sq: f32,
}

impl Window {
    pub fn new() -> Window {
        let mut w = [0.0; NFFT];
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;

        let k = 2.0 * core::f32::consts::PI / NFFT as f32;

        for (i, w) in w.iter_mut().enumerate() {
            let t = k * i as f32;

            *w = A[0] - A[1] * libm::cosf(t) + A[2] * libm::cosf(2. * t)
                - A[3] * libm::cosf(3. * t)
                + A[4] * libm::cosf(4. * t);

            sum += *w as f64;
            sum_sq += (*w as f64) * (*w as f64);
        }

        defmt::debug!("window: sum: {}, sum_sq: {}", sum, sum_sq);

        Window {
            w,
            sum: sum as f32,
            sum_sq: sum_sq as f32,
        }
    }

    pub fn coefficients(&self) -> &[f32; NFFT] {
        &self.w
    }
}

impl Default for Window {
    fn default() -> Self {
        Window::new()
    }
}
