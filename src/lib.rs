//! Measurement-and-control core of a grid-tie micro-inverter.
//!
//! Two independent halves share this crate:
//!
//! * [`analysis`]: per-cycle spectral analysis of the sampled AC voltage (tone, THD, noise
//!   floor).
//! * [`safety`] and [`pwm`]: the permit/trip interlock driving a dead-time-safe
//!   complementary PWM waveform.
//!
//! Hardware is reached only through the traits in [`adc`], [`temp`] and [`pwm`], and the
//! step timer is any `embedded-hal` periodic, cancellable `CountDown`.
#![cfg_attr(not(test), no_std)]

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};

pub mod adc;
pub mod analysis;
pub mod config;
pub mod log;
pub mod pwm;
pub mod relay;
pub mod safety;
pub mod temp;

pub use analysis::{Analyzer, Metrics, Quality};
pub use safety::{Control, Event, Inverter, Mode, TripReason};

/// Length of the analysis block and the transform.
pub const NFFT: usize = 4096;

/// Number of entries in the waveform table (one output cycle).
pub const STEPS: usize = 180;

/// Capacity of the event queue between interrupt handlers and the inverter worker. Must be a
/// power of two.
pub const EVENTQ_SZ: usize = 16;

/// Capacity of the report queue.
pub const REPORTQ_SZ: usize = 4;

static_assertions::const_assert!(NFFT.is_power_of_two());
static_assertions::const_assert!(EVENTQ_SZ.is_power_of_two());
static_assertions::const_assert!(REPORTQ_SZ.is_power_of_two());
