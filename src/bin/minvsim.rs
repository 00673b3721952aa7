use anyhow::{anyhow, bail};
use argh::FromArgs;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde_json as json;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use minv::adc::{AdcSource, Channel, SampleBlock};
use minv::config::{AnalysisConfig, PwmConfig};
use minv::log::Reports;
use minv::pwm::{self, Polarity, PwmSink};
use minv::relay::Telemetry;
use minv::temp::TemperatureSource;
use minv::{Analyzer, Control, Inverter, TripReason, NFFT};

#[derive(FromArgs)]
/// Run the analysis pipeline and the inverter state machine on the host.
struct MinvSim {
    #[argh(subcommand)]
    cmd: Cmd,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Cmd {
    Analyze(Analyze),
    Pwm(Pwm),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "analyze")]
/// Analyze a synthesized or recorded voltage signal.
struct Analyze {
    #[argh(option, default = "50.0", description = "tone frequency [Hz]")]
    tone: f32,

    #[argh(option, default = "325.0", description = "tone amplitude [V]")]
    amplitude: f32,

    #[argh(option, description = "harmonic as K:REL, e.g. 3:0.05")]
    harmonic: Vec<Harmonic>,

    #[argh(option, default = "0.0", description = "white noise [V rms]")]
    noise: f32,

    #[argh(option, default = "1", description = "number of cycles")]
    cycles: usize,

    #[argh(option, default = "0", description = "noise seed")]
    seed: u64,

    #[argh(
        option,
        description = "read interleaved little-endian u16 blocks from file instead"
    )]
    raw: Option<PathBuf>,

    #[argh(switch, description = "print metrics as JSON")]
    json: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "pwm")]
/// Run the inverter against a recording PWM sink and print the pulse widths.
struct Pwm {
    #[argh(option, default = "minv::STEPS", description = "number of ticks")]
    ticks: usize,

    #[argh(option, description = "trip at this tick")]
    trip_at: Option<usize>,

    #[argh(option, description = "duty average")]
    duty_average: Option<f32>,

    #[argh(option, description = "duty range")]
    duty_range: Option<f32>,
}

fn main() -> anyhow::Result<()> {
    let sim: MinvSim = argh::from_env();

    match sim.cmd {
        Cmd::Analyze(a) => analyze(a),
        Cmd::Pwm(p) => pwm(p),
    }
}

fn analyze(a: Analyze) -> anyhow::Result<()> {
    let config = AnalysisConfig::default();
    let mut analyzer = Box::new(Analyzer::new(config));
    let telemetry = Telemetry::new();
    let reports = Reports::new();

    eprintln!(
        "Sample rate: {} Hz, bin width: {:.3} Hz",
        config.sample_rate,
        analyzer.bin_width()
    );

    let mut adc: Box<dyn SimSource> = match &a.raw {
        Some(p) => Box::new(RawAdc::from_file(p)?),
        None => Box::new(SynthAdc::new(&a, config)?),
    };

    let mut sensor = DieTemp(25.0);

    for _ in 0..a.cycles {
        let m = match analyzer.cycle(&mut adc, &mut sensor) {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Cycle failed: {:?}", e);
                break;
            }
        };

        telemetry.publish(&m);

        if a.json {
            println!("{}", json::to_string(&m)?);
        } else {
            reports.push(&m);

            let mut out = String::new();
            reports.drain(&mut out);
            print!("{}", out);
        }
    }

    eprintln!("Last tone: {} mHz", telemetry.frequency_mhz());

    Ok(())
}

fn pwm(p: Pwm) -> anyhow::Result<()> {
    let defaults = PwmConfig::default();
    let config = PwmConfig {
        duty_average: p.duty_average.unwrap_or(defaults.duty_average),
        duty_range: p.duty_range.unwrap_or(defaults.duty_range),
        ..defaults
    };

    eprintln!(
        "Carrier: {} Hz, period: {} ns, step period: {} us, dead time: {} ns",
        config.carrier_hz,
        config.period_ns(),
        config.step_period_us(),
        config.dead_time_ns
    );

    let control = Control::new();
    let mut inverter = Inverter::new(&control, PrintSink::default(), SimTimer::default(), config)
        .map_err(|e| anyhow!("could not set up inverter: {:?}", e))?;
    inverter.sink_mut().flush("init");

    control
        .request_on()
        .map_err(|e| anyhow!("could not request on: {:?}", e))?;
    inverter.process();
    inverter.sink_mut().flush("0");

    for t in 1..p.ticks {
        if p.trip_at == Some(t) {
            control.trip(TripReason::External);
        } else if inverter.timer().running() {
            control
                .tick()
                .map_err(|e| anyhow!("could not post tick: {:?}", e))?;
        }

        inverter.process();
        inverter.sink_mut().flush(&t.to_string());
    }

    eprintln!("Final state: {:?}", inverter.state());

    Ok(())
}

/// `K:REL`: harmonic number and amplitude relative to the tone.
#[derive(Debug, Clone, Copy)]
struct Harmonic {
    k: u32,
    rel: f32,
}

impl FromStr for Harmonic {
    type Err = String;

    fn from_str(s: &str) -> Result<Harmonic, String> {
        let (k, rel) = s
            .split_once(':')
            .ok_or_else(|| format!("expected K:REL, got: {}", s))?;

        let k = k.parse().map_err(|e| format!("invalid harmonic {}: {}", k, e))?;
        let rel = rel
            .parse()
            .map_err(|e| format!("invalid amplitude {}: {}", rel, e))?;

        if k < 2 {
            return Err(format!("harmonic must be 2 or higher, got: {}", k));
        }

        Ok(Harmonic { k, rel })
    }
}

#[derive(Debug, defmt::Format)]
enum SimError {
    EndOfData,
}

trait SimSource: AdcSource<Error = SimError> {}
impl<T: AdcSource<Error = SimError>> SimSource for T {}

impl AdcSource for Box<dyn SimSource> {
    type Error = SimError;

    fn read_block(&mut self, raw: &mut SampleBlock) -> Result<(), SimError> {
        (**self).read_block(raw)
    }

    fn raw_to_millivolts(&self, channel: Channel, raw: u16) -> Result<i32, SimError> {
        (**self).raw_to_millivolts(channel, raw)
    }
}

/// Supply reference of the simulated ADC [mV].
const VDD_MV: f32 = 3300.;

/// Synthesized tone with harmonics and noise, sampled continuously across blocks. One code is
/// one millivolt.
struct SynthAdc {
    tone: f32,
    amplitude: f32,
    harmonics: Vec<Harmonic>,
    noise: Option<Normal<f32>>,
    rng: StdRng,
    sample_rate: f32,
    scale: f32,
    n: u64,
}

impl SynthAdc {
    fn new(a: &Analyze, config: AnalysisConfig) -> anyhow::Result<SynthAdc> {
        let peak = a.amplitude * (1. + a.harmonic.iter().map(|h| h.rel.abs()).sum::<f32>());
        if peak / config.divider_scale > VDD_MV / 2. {
            bail!("amplitude {} V saturates the ADC", peak);
        }

        let noise = if a.noise > 0. {
            Some(Normal::new(0.0, a.noise)?)
        } else {
            None
        };

        Ok(SynthAdc {
            tone: a.tone,
            amplitude: a.amplitude,
            harmonics: a.harmonic.clone(),
            noise,
            rng: StdRng::seed_from_u64(a.seed),
            sample_rate: config.sample_rate,
            scale: config.divider_scale,
            n: 0,
        })
    }

    fn volts(&mut self) -> f32 {
        let t = self.n as f64 / self.sample_rate as f64;
        let w = 2. * std::f64::consts::PI * self.tone as f64 * t;
        self.n += 1;

        let mut v = self.amplitude as f64 * w.sin();
        for h in &self.harmonics {
            v += (h.rel * self.amplitude) as f64 * (h.k as f64 * w).sin();
        }

        let noise = self.noise.map(|d| d.sample(&mut self.rng)).unwrap_or(0.0);

        v as f32 + noise
    }
}

impl AdcSource for SynthAdc {
    type Error = SimError;

    fn read_block(&mut self, raw: &mut SampleBlock) -> Result<(), SimError> {
        for pair in raw.chunks_exact_mut(2) {
            let mv = self.volts() / self.scale + VDD_MV / 2.;
            pair[0] = mv.round().clamp(0., VDD_MV) as u16;
            pair[1] = VDD_MV as u16;
        }

        Ok(())
    }

    fn raw_to_millivolts(&self, _channel: Channel, raw: u16) -> Result<i32, SimError> {
        Ok(raw as i32)
    }
}

/// Recorded blocks of raw codes, one code is one millivolt.
struct RawAdc {
    codes: Vec<u16>,
    offset: usize,
}

impl RawAdc {
    fn from_file(p: impl AsRef<Path>) -> anyhow::Result<RawAdc> {
        let p = p.as_ref();
        let b = std::fs::read(p)?;

        let block = 2 * NFFT * 2;
        if b.len() % block != 0 {
            eprintln!("Warning, file consists of non-integer number of blocks.");
        }

        eprintln!("Loaded {} blocks from: {:?}", b.len() / block, p);

        let codes = b
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();

        Ok(RawAdc { codes, offset: 0 })
    }
}

impl AdcSource for RawAdc {
    type Error = SimError;

    fn read_block(&mut self, raw: &mut SampleBlock) -> Result<(), SimError> {
        let block = self
            .codes
            .get(self.offset..self.offset + raw.len())
            .ok_or(SimError::EndOfData)?;

        raw.copy_from_slice(block);
        self.offset += raw.len();

        Ok(())
    }

    fn raw_to_millivolts(&self, _channel: Channel, raw: u16) -> Result<i32, SimError> {
        Ok(raw as i32)
    }
}

struct DieTemp(f32);

impl TemperatureSource for DieTemp {
    type Error = SimError;

    fn read_celsius(&mut self) -> Result<f32, SimError> {
        Ok(self.0)
    }
}

#[derive(Debug, defmt::Format)]
struct Never;

/// Prints the writes of each step.
#[derive(Default)]
struct PrintSink {
    writes: Vec<(pwm::Channel, u32, Polarity)>,
}

impl PrintSink {
    fn flush(&mut self, tick: &str) {
        for (channel, pulse_ns, polarity) in self.writes.drain(..) {
            println!("{:>5} {:?}: {} ns {:?}", tick, channel, pulse_ns, polarity);
        }
    }
}

impl PwmSink for PrintSink {
    type Error = Never;

    fn set(
        &mut self,
        channel: pwm::Channel,
        _carrier_hz: u32,
        pulse_ns: u32,
        polarity: Polarity,
    ) -> Result<(), Never> {
        self.writes.push((channel, pulse_ns, polarity));
        Ok(())
    }
}

#[derive(Default)]
struct SimTimer {
    running: bool,
}

impl SimTimer {
    fn running(&self) -> bool {
        self.running
    }
}

impl embedded_hal::timer::CountDown for SimTimer {
    type Time = u32;

    fn start<T: Into<u32>>(&mut self, _count: T) {
        self.running = true;
    }

    fn wait(&mut self) -> nb::Result<(), void::Void> {
        if self.running {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

impl embedded_hal::timer::Periodic for SimTimer {}

impl embedded_hal::timer::Cancel for SimTimer {
    type Error = ();

    fn cancel(&mut self) -> Result<(), ()> {
        if std::mem::take(&mut self.running) {
            Ok(())
        } else {
            Err(())
        }
    }
}
