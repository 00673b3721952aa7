use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;

fn main() {
    let out_dir = env::var_os("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("config.rs");

    // Determined by experimental calibration of the ADC sequence.
    let sample_rate: f32 = env::var("SAMPLE_RATE")
        .ok()
        .map(|p| p.parse::<f32>().unwrap())
        .unwrap_or(16340.4);

    let pwm_freq: u32 = env::var("PWM_FREQ")
        .ok()
        .map(|p| p.parse::<u32>().unwrap())
        .unwrap_or(10_000);

    let cycle_freq: f32 = env::var("CYCLE_FREQ")
        .ok()
        .map(|p| p.parse::<f32>().unwrap())
        .unwrap_or(0.3);

    let duty_avg: f32 = env::var("DUTY_AVG")
        .ok()
        .map(|p| p.parse::<f32>().unwrap())
        .unwrap_or(0.5);

    let duty_range: f32 = env::var("DUTY_RANGE")
        .ok()
        .map(|p| p.parse::<f32>().unwrap())
        .unwrap_or(0.9);

    let deadtime_ns: u32 = env::var("DEADTIME_NS")
        .ok()
        .map(|p| p.parse::<u32>().unwrap())
        .unwrap_or(500);

    let max_harmonic: usize = env::var("MAX_HARMONIC")
        .ok()
        .map(|p| p.parse::<usize>().unwrap())
        .unwrap_or(50);

    assert!(sample_rate > 0., "SAMPLE_RATE must be positive");
    assert!(pwm_freq > 0, "PWM_FREQ must be positive");
    assert!(cycle_freq > 0., "CYCLE_FREQ must be positive");
    assert!(max_harmonic >= 2, "MAX_HARMONIC must be at least 2");

    // `{:?}` keeps a decimal point on floats so the output stays a valid f32 literal.
    let fd = fs::File::create(&dest_path).unwrap();
    writeln!(&fd, "pub const SAMPLE_RATE: f32 = {sample_rate:?};").unwrap();
    writeln!(&fd, "pub const PWM_FREQ: u32 = {pwm_freq};").unwrap();
    writeln!(&fd, "pub const CYCLE_FREQ: f32 = {cycle_freq:?};").unwrap();
    writeln!(&fd, "pub const DUTY_AVG: f32 = {duty_avg:?};").unwrap();
    writeln!(&fd, "pub const DUTY_RANGE: f32 = {duty_range:?};").unwrap();
    writeln!(&fd, "pub const DEADTIME_NS: u32 = {deadtime_ns};").unwrap();
    writeln!(&fd, "pub const MAX_HARMONIC: usize = {max_harmonic};").unwrap();

    println!("cargo:rerun-if-changed=build.rs");
    for var in [
        "SAMPLE_RATE",
        "PWM_FREQ",
        "CYCLE_FREQ",
        "DUTY_AVG",
        "DUTY_RANGE",
        "DEADTIME_NS",
        "MAX_HARMONIC",
    ] {
        println!("cargo:rerun-if-env-changed={var}");
    }
}
