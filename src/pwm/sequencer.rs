//! Steps through the waveform table and programs the outputs.

use super::{Channel, Polarity, PwmSink, WaveformTable};
use crate::config::PwmConfig;
use crate::STEPS;

pub struct Sequencer {
    config: PwmConfig,

    /// Next step in the table.
    index: usize,

    /// Last pulse width committed to the complementary pair [ns].
    previous_ns: u32,
}

impl Sequencer {
    pub fn new(config: PwmConfig) -> Sequencer {
        Sequencer {
            config,
            index: 0,
            previous_ns: 0,
        }
    }

    /// Restart from phase 0.
    pub fn reset(&mut self) {
        self.index = 0;
        self.previous_ns = 0;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn previous_ns(&self) -> u32 {
        self.previous_ns
    }

    /// Program the outputs for the current step and advance. Returns the pulse width.
    ///
    /// On a failed write the remaining writes are skipped and the pair is not committed: the
    /// first write of the pair always widens the gap between the switches, so the outputs stay
    /// non-overlapping.
    pub fn step<P: PwmSink>(
        &mut self,
        sink: &mut P,
        table: &WaveformTable,
    ) -> Result<u32, P::Error> {
        let period = self.config.period_ns();
        let carrier = self.config.carrier_hz;
        let dt = self.config.dead_time_ns;

        let pulse_ns = ((period as f32 * table.level(self.index)) as u32).min(period);

        defmt::trace!("sequencer: step {}, pulse: {} ns", self.index, pulse_ns);
        self.index = (self.index + 1) % STEPS;

        sink.set(Channel::Reference, carrier, pulse_ns, Polarity::Normal)
            .inspect_err(|e| defmt::error!("sequencer: failed to set reference: {:?}", e))?;

        let high = (Channel::HighSide, pulse_ns.saturating_sub(dt), Polarity::Normal);
        let low = (
            Channel::LowSide,
            pulse_ns.saturating_add(dt).min(period),
            Polarity::Inverted,
        );

        let pair = if pulse_ns > self.previous_ns {
            [low, high]
        } else {
            [high, low]
        };

        for (channel, width, polarity) in pair {
            sink.set(channel, carrier, width, polarity).inspect_err(|e| {
                defmt::error!(
                    "sequencer: failed to set {}, pair not committed: {:?}",
                    channel,
                    e
                )
            })?;
        }

        self.previous_ns = pulse_ns;

        Ok(pulse_ns)
    }

    /// Drive all outputs to zero width with normal polarity. A failing write is retried once.
    /// Returns the number of outputs that could not be zeroed.
    pub fn zero<P: PwmSink>(&mut self, sink: &mut P) -> usize {
        let carrier = self.config.carrier_hz;
        let mut failures = 0;

        for channel in Channel::ZERO_ORDER {
            let r = sink
                .set(channel, carrier, 0, Polarity::Normal)
                .or_else(|e| {
                    defmt::warn!("sequencer: failed to zero {}, retrying: {:?}", channel, e);
                    sink.set(channel, carrier, 0, Polarity::Normal)
                });

            if let Err(e) = r {
                defmt::error!("sequencer: could not zero {}: {:?}", channel, e);
                failures += 1;
            }
        }

        self.previous_ns = 0;

        failures
    }
}
