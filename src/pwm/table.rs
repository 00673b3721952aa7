//! One output cycle of duty levels.

use crate::STEPS;

pub struct WaveformTable {
    levels: [f32; STEPS],
    average: f32,
    range: f32,
}

impl WaveformTable {
    pub fn new(average: f32, range: f32) -> WaveformTable {
        let mut t = WaveformTable {
            levels: [0.0; STEPS],
            average,
            range,
        };
        t.generate();
        t
    }

    /// Whether every level of a table with this average and range falls in `[0, 1]`.
    pub fn is_valid(average: f32, range: f32) -> bool {
        average.is_finite()
            && range.is_finite()
            && average >= 0.0
            && average * (1.0 + libm::fabsf(range)) <= 1.0
            && average * (1.0 - libm::fabsf(range)) >= 0.0
    }

    /// Regenerate the levels if the average or range changed. Values are not clamped.
    pub fn regenerate(&mut self, average: f32, range: f32) -> bool {
        if average == self.average && range == self.range {
            return false;
        }

        self.average = average;
        self.range = range;
        self.generate();

        true
    }

    fn generate(&mut self) {
        let k = 2.0 * core::f32::consts::PI / STEPS as f32;

        for (i, l) in self.levels.iter_mut().enumerate() {
            *l = self.average * (1.0 + self.range * libm::sinf(k * i as f32));
        }

        defmt::debug!(
            "table: generated {} levels, average: {}, range: {}",
            STEPS,
            self.average,
            self.range
        );
    }

    /// Level at step `i`, wrapping around.
    pub fn level(&self, i: usize) -> f32 {
        self.levels[i % STEPS]
    }

    pub fn levels(&self) -> &[f32; STEPS] {
        &self.levels
    }

    pub fn average(&self) -> f32 {
        self.average
    }

    pub fn range(&self) -> f32 {
        self.range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn default_duty_in_bounds() {
        let t = WaveformTable::new(0.5, 0.9);

        assert!(t.levels().iter().all(|l| (0.0275..=0.975).contains(l)));

        assert_abs_diff_eq!(t.level(0), 0.5);
        assert_abs_diff_eq!(t.level(45), 0.95, epsilon = 1e-5);
        assert_abs_diff_eq!(t.level(135), 0.05, epsilon = 1e-5);

        for i in 0..STEPS {
            assert_eq!(t.level(i), t.level(i + STEPS));
        }
    }

    #[test]
    fn validity() {
        assert!(WaveformTable::is_valid(0.5, 0.9));
        assert!(WaveformTable::is_valid(0.5, 1.0));
        assert!(WaveformTable::is_valid(0.0, 0.0));
        assert!(!WaveformTable::is_valid(0.6, 0.9));
        assert!(!WaveformTable::is_valid(0.5, 1.1));
        assert!(!WaveformTable::is_valid(-0.1, 0.0));
        assert!(!WaveformTable::is_valid(f32::NAN, 0.5));
    }

    #[test]
    fn regenerate_only_on_change() {
        let mut t = WaveformTable::new(0.5, 0.9);
        assert!(!t.regenerate(0.5, 0.9));

        assert!(t.regenerate(0.4, 0.5));
        assert_abs_diff_eq!(t.level(45), 0.6, epsilon = 1e-5);
        assert_eq!(t.average(), 0.4);
        assert_eq!(t.range(), 0.5);
    }
}
