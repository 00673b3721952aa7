use core::fmt::Write;
use heapless::{mpmc::MpMcQueue, String};

use crate::analysis::Metrics;
use crate::REPORTQ_SZ;

pub type Line = String<256>;

/// Report lines waiting to be written out over the console.
pub struct Reports {
    queue: MpMcQueue<Line, REPORTQ_SZ>,
}

impl Reports {
    pub const fn new() -> Reports {
        Reports {
            queue: MpMcQueue::new(),
        }
    }

    pub fn push(&self, m: &Metrics) {
        let mut s = Line::new();
        if write!(s, "{}", m).is_err() {
            defmt::warn!("reports: line truncated");
        }

        self.log(s);
    }

    pub fn log(&self, line: Line) {
        defmt::debug!("reports: {}", line.as_str());

        self.queue
            .enqueue(line)
            .inspect_err(|_| defmt::error!("reports: queue full, dropping line"))
            .ok();
    }

    /// Write out queued lines in order, one per line. Returns the number of lines written. A
    /// line that fails to write is dropped.
    pub fn drain(&self, out: &mut impl Write) -> usize {
        let mut n = 0;

        while let Some(line) = self.queue.dequeue() {
            if let Err(e) = writeln!(out, "{}", line) {
                defmt::error!("reports: failed to write line: {}", defmt::Debug2Format(&e));
                continue;
            }
            n += 1;
        }

        n
    }
}

impl Default for Reports {
    fn default() -> Self {
        Reports::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Quality;

    fn metrics(dc: f32) -> Metrics {
        Metrics {
            mean_dc: dc,
            tone_bin: 13,
            tone_frequency: 49.88,
            tone_amplitude_rms: 229.91,
            tone_phase: 0.123,
            thd_percent: 1.23,
            noise_density: 1.23e-3,
            harmonics: 49,
            noise_bins: 1850,
            temperature: Some(41.),
            quality: Quality::Good,
        }
    }

    #[test]
    fn drain_in_order() {
        let r = Reports::new();
        r.push(&metrics(0.12));
        r.push(&metrics(0.34));

        let mut out = std::string::String::new();
        assert_eq!(r.drain(&mut out), 2);

        assert_eq!(
            out,
            "DC 0.12 Tone: 49.88 Hz mag 229.91 Vrms phase 0.123 rad THD 1.23% rms noise 1.23e-3 V/rtHz 41.00 C\n\
             DC 0.34 Tone: 49.88 Hz mag 229.91 Vrms phase 0.123 rad THD 1.23% rms noise 1.23e-3 V/rtHz 41.00 C\n"
        );

        assert_eq!(r.drain(&mut out), 0);
    }

    #[test]
    fn full_queue_drops() {
        let r = Reports::new();
        for i in 0..REPORTQ_SZ + 2 {
            r.push(&metrics(i as f32));
        }

        let mut out = std::string::String::new();
        assert_eq!(r.drain(&mut out), REPORTQ_SZ);
        assert!(out.starts_with("DC 0.00 "));
    }
}
