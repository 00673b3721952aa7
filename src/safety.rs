//! Permit/trip interlock for the PWM output.
//!
//! Requests from interrupt handlers and the control link are posted to [`Control`] and handled
//! strictly in order by [`Inverter::process`] on a single worker. The worker owns the PWM sink,
//! the step timer and the waveform table; nothing else mutates them.
//!
//! Any fault converges on a trip: the step timer is cancelled, every output is driven to zero
//! and the permit is revoked. A trip never fails and can always be requested.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use embedded_hal::timer::{Cancel, CountDown, Periodic};
use heapless::mpmc::MpMcQueue;

use crate::config::PwmConfig;
use crate::pwm::{PwmSink, Sequencer, WaveformTable};
use crate::EVENTQ_SZ;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum TripReason {
    Requested,

    /// The controlling link went away.
    Disconnected,

    /// External fault input.
    External,

    /// Outputs were actuated while not permitted.
    Defensive,
}

/// Latched stop request. A latched trip takes precedence.
const LATCHED_OFF: u8 = 0xff;

impl TripReason {
    fn latch(self) -> u8 {
        match self {
            TripReason::Requested => 1,
            TripReason::Disconnected => 2,
            TripReason::External => 3,
            TripReason::Defensive => 4,
        }
    }

    fn unlatch(v: u8) -> Option<TripReason> {
        match v {
            1 => Some(TripReason::Requested),
            2 => Some(TripReason::Disconnected),
            3 => Some(TripReason::External),
            4 => Some(TripReason::Defensive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, defmt::Format)]
pub enum Event {
    RequestOn,
    RequestOff,
    Trip(TripReason),

    /// Advance the sequencer one step.
    Tick,

    SetDuty { average: f32, range: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Mode {
    Off,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, defmt::Format)]
pub struct InverterState {
    pub mode: Mode,

    /// Whether the outputs may be actuated, mirrored by [`Control::permit`].
    pub permit_service: bool,

    pub duty_average: f32,
    pub duty_range: f32,

    /// Pulse width of the last step, 0 when stopped [ns].
    pub last_pulse_width_ns: u32,

    /// Steps actuated since start-up.
    pub steps: u32,

    pub last_trip: Option<TripReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum InverterError {
    /// The event queue is full.
    QueueFull,

    /// Duty average and range would put levels outside `[0, 1]`.
    InvalidDuty,
}

/// Shared between interrupt handlers, the control link and the worker.
pub struct Control {
    queue: MpMcQueue<Event, EVENTQ_SZ>,

    /// Reason of a trip that could not be queued, 0 when clear.
    latch: AtomicU8,

    /// Whether the outputs may be actuated.
    permit: AtomicBool,
}

impl Control {
    pub const fn new() -> Control {
        Control {
            queue: MpMcQueue::new(),
            latch: AtomicU8::new(0),
            permit: AtomicBool::new(false),
        }
    }

    pub fn post(&self, event: Event) -> Result<(), InverterError> {
        self.queue.enqueue(event).map_err(|e| {
            defmt::warn!("control: queue full, dropping: {}", e);
            InverterError::QueueFull
        })
    }

    pub fn request_on(&self) -> Result<(), InverterError> {
        self.post(Event::RequestOn)
    }

    /// Request the outputs off. Never fails: the request is latched when the queue is full.
    pub fn request_off(&self) {
        if self.queue.enqueue(Event::RequestOff).is_err() {
            defmt::error!("control: queue full, latching off request");
            self.latch
                .compare_exchange(0, LATCHED_OFF, Ordering::SeqCst, Ordering::SeqCst)
                .ok();
        }
    }

    /// Request a trip. The permit is revoked immediately so queued ticks are skipped and an
    /// actuation in progress is caught. Never fails.
    pub fn trip(&self, reason: TripReason) {
        self.permit.store(false, Ordering::SeqCst);

        if self.queue.enqueue(Event::Trip(reason)).is_err() {
            self.latch(reason);
        }
    }

    /// Step timer interrupt.
    pub fn tick(&self) -> Result<(), InverterError> {
        self.post(Event::Tick)
    }

    pub fn set_duty(&self, average: f32, range: f32) -> Result<(), InverterError> {
        self.post(Event::SetDuty { average, range })
    }

    pub fn permit(&self) -> bool {
        self.permit.load(Ordering::SeqCst)
    }

    /// Whether a trip or off request is latched and not yet serviced.
    pub fn latched(&self) -> bool {
        self.latch.load(Ordering::SeqCst) != 0
    }

    fn latch(&self, reason: TripReason) {
        defmt::error!("control: queue full, latching trip: {}", reason);
        self.latch.store(reason.latch(), Ordering::SeqCst);
    }

    fn take_latch(&self) -> Option<Event> {
        match self.latch.swap(0, Ordering::SeqCst) {
            LATCHED_OFF => Some(Event::RequestOff),
            v => TripReason::unlatch(v).map(Event::Trip),
        }
    }

    fn grant(&self) {
        self.permit.store(true, Ordering::SeqCst);
    }

    fn revoke(&self) {
        self.permit.store(false, Ordering::SeqCst);
    }
}

impl Default for Control {
    fn default() -> Self {
        Control::new()
    }
}

pub struct Inverter<'a, P, T> {
    control: &'a Control,
    sink: P,
    timer: T,
    config: PwmConfig,
    table: WaveformTable,
    sequencer: Sequencer,
    state: InverterState,
}

impl<'a, P, T> Inverter<'a, P, T>
where
    P: PwmSink,
    T: CountDown + Periodic + Cancel,
    u32: Into<T::Time>,
{
    /// Set up the inverter in `Off`, driving all outputs to zero.
    pub fn new(
        control: &'a Control,
        sink: P,
        timer: T,
        config: PwmConfig,
    ) -> Result<Inverter<'a, P, T>, InverterError> {
        if !WaveformTable::is_valid(config.duty_average, config.duty_range) {
            defmt::error!("inverter: invalid duty configuration: {}", config);
            return Err(InverterError::InvalidDuty);
        }

        let mut inverter = Inverter {
            control,
            sink,
            timer,
            config,
            table: WaveformTable::new(config.duty_average, config.duty_range),
            sequencer: Sequencer::new(config),
            state: InverterState {
                mode: Mode::Off,
                permit_service: false,
                duty_average: config.duty_average,
                duty_range: config.duty_range,
                last_pulse_width_ns: 0,
                steps: 0,
                last_trip: None,
            },
        };

        control.revoke();
        inverter.sequencer.zero(&mut inverter.sink);

        Ok(inverter)
    }

    pub fn state(&self) -> &InverterState {
        &self.state
    }

    pub fn table(&self) -> &WaveformTable {
        &self.table
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut P {
        &mut self.sink
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Handle all queued events. A latched trip or off request is serviced first: the queued
    /// duty updates still apply, the other queued events are overridden and discarded. Returns
    /// the number of events handled.
    pub fn process(&mut self) -> usize {
        let mut handled = 0;

        loop {
            if let Some(mut latched) = self.control.take_latch() {
                let mut discarded = 0;

                while let Some(event) = self.control.queue.dequeue() {
                    match event {
                        Event::SetDuty { average, range } => {
                            self.set_duty(average, range)
                                .inspect_err(|e| defmt::error!("inverter: {} failed: {}", event, e))
                                .ok();
                            handled += 1;
                        }
                        Event::Trip(reason) if latched == Event::RequestOff => {
                            latched = Event::Trip(reason);
                            discarded += 1;
                        }
                        _ => discarded += 1,
                    }
                }

                defmt::warn!(
                    "inverter: servicing latched {}, discarded {} events",
                    latched,
                    discarded
                );

                match latched {
                    Event::Trip(reason) => self.trip(reason),
                    _ => self.stop(),
                }

                handled += 1;
                continue;
            }

            match self.control.queue.dequeue() {
                Some(event) => {
                    self.handle(event)
                        .inspect_err(|e| defmt::error!("inverter: {} failed: {}", event, e))
                        .ok();
                    handled += 1;
                }
                None => break handled,
            }
        }
    }

    pub fn handle(&mut self, event: Event) -> Result<(), InverterError> {
        defmt::trace!("inverter: handling {}", event);

        match event {
            Event::RequestOn => self.start(),
            Event::RequestOff => {
                self.stop();
                Ok(())
            }
            Event::Trip(reason) => {
                self.trip(reason);
                Ok(())
            }
            Event::Tick => {
                self.step();
                Ok(())
            }
            Event::SetDuty { average, range } => self.set_duty(average, range),
        }
    }

    fn start(&mut self) -> Result<(), InverterError> {
        if self.state.mode == Mode::Running {
            defmt::debug!("inverter: already running");
            return Ok(());
        }

        defmt::info!(
            "inverter: starting, step period: {} us",
            self.config.step_period_us()
        );

        self.sequencer.reset();
        self.timer.start(self.config.step_period_us());
        self.control.grant();
        self.state.permit_service = true;
        self.state.mode = Mode::Running;

        // Phase 0 right away, the timer follows one step period later.
        self.control.tick()
    }

    /// Cancel the timer, zero the outputs and revoke the permit.
    fn stop(&mut self) {
        if self.timer.cancel().is_err() {
            defmt::trace!("inverter: step timer was not running");
        }

        let failures = self.sequencer.zero(&mut self.sink);
        if failures > 0 {
            defmt::error!("inverter: {} outputs could not be zeroed", failures);
        }

        self.control.revoke();
        self.state.permit_service = false;
        self.state.last_pulse_width_ns = 0;

        if self.state.mode == Mode::Running {
            defmt::info!("inverter: off after {} steps", self.state.steps);
        }

        self.state.mode = Mode::Off;
    }

    /// Force the outputs off. Idempotent.
    pub fn trip(&mut self, reason: TripReason) {
        defmt::warn!("inverter: trip: {}", reason);

        self.stop();
        self.state.last_trip = Some(reason);
    }

    fn step(&mut self) {
        if !self.control.permit() || self.state.mode != Mode::Running {
            defmt::debug!("inverter: tick while not permitted, skipping");
            return;
        }

        if let Ok(pulse_ns) = self.sequencer.step(&mut self.sink, &self.table) {
            self.state.last_pulse_width_ns = pulse_ns;
            self.state.steps = self.state.steps.wrapping_add(1);
        }

        if !self.control.permit() {
            defmt::error!("inverter: permit revoked during actuation");
            self.trip(TripReason::Defensive);
        }
    }

    fn set_duty(&mut self, average: f32, range: f32) -> Result<(), InverterError> {
        if !WaveformTable::is_valid(average, range) {
            return Err(InverterError::InvalidDuty);
        }

        if self.table.regenerate(average, range) {
            defmt::info!("inverter: duty average: {}, range: {}", average, range);
        }

        self.state.duty_average = average;
        self.state.duty_range = range;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pwm::tests::{PwmFault, Recorder};
    use crate::pwm::{Channel, Polarity};

    #[derive(Debug, Default)]
    pub struct MockTimer {
        pub running: bool,
        pub period_us: Option<u32>,
        pub starts: u32,
    }

    impl CountDown for MockTimer {
        type Time = u32;

        fn start<C: Into<u32>>(&mut self, count: C) {
            self.running = true;
            self.period_us = Some(count.into());
            self.starts += 1;
        }

        fn wait(&mut self) -> nb::Result<(), void::Void> {
            if self.running {
                Ok(())
            } else {
                Err(nb::Error::WouldBlock)
            }
        }
    }

    impl Periodic for MockTimer {}

    impl Cancel for MockTimer {
        type Error = ();

        fn cancel(&mut self) -> Result<(), ()> {
            if self.running {
                self.running = false;
                Ok(())
            } else {
                Err(())
            }
        }
    }

    fn inverter(control: &Control) -> Inverter<'_, Recorder, MockTimer> {
        let mut i = Inverter::new(
            control,
            Recorder::default(),
            MockTimer::default(),
            PwmConfig::default(),
        )
        .unwrap();
        i.sink_mut().writes.clear();
        i
    }

    fn all_zero(sink: &Recorder) -> bool {
        [Channel::Reference, Channel::LowSide, Channel::HighSide]
            .iter()
            .all(|c| sink.last(*c) == Some(0))
    }

    #[test]
    fn starts_off_and_zeroed() {
        let control = Control::new();
        let i = Inverter::new(
            &control,
            Recorder::default(),
            MockTimer::default(),
            PwmConfig::default(),
        )
        .unwrap();

        assert_eq!(i.state().mode, Mode::Off);
        assert!(!control.permit());
        assert!(all_zero(i.sink()));
    }

    #[test]
    fn invalid_config_refused() {
        let control = Control::new();
        let config = PwmConfig {
            duty_average: 0.8,
            ..Default::default()
        };

        assert_eq!(
            Inverter::new(&control, Recorder::default(), MockTimer::default(), config).err(),
            Some(InverterError::InvalidDuty)
        );
    }

    #[test]
    fn request_on_runs_phase_zero() {
        let control = Control::new();
        let mut i = inverter(&control);

        control.request_on().unwrap();
        assert_eq!(i.process(), 2);

        assert_eq!(i.state().mode, Mode::Running);
        assert!(control.permit());
        assert!(i.timer().running);
        assert_eq!(i.timer().period_us, Some(PwmConfig::default().step_period_us()));
        assert_eq!(i.sink().last(Channel::Reference), Some(50_000));
        assert_eq!(i.state().last_pulse_width_ns, 50_000);
        assert!(i.state().permit_service);
        assert_eq!(i.state().steps, 1);

        // Running: another request is a no-op.
        control.request_on().unwrap();
        i.process();
        assert_eq!(i.timer().starts, 1);

        control.tick().unwrap();
        control.tick().unwrap();
        i.process();
        assert_eq!(i.state().steps, 3);
    }

    #[test]
    fn trip_twice() {
        let control = Control::new();
        let mut i = inverter(&control);

        control.request_on().unwrap();
        i.process();

        for _ in 0..2 {
            control.trip(TripReason::External);
            i.process();

            assert!(!control.permit());
            assert!(!i.state().permit_service);
            assert_eq!(i.state().last_pulse_width_ns, 0);
            assert!(!i.timer().running);
            assert_eq!(i.state().mode, Mode::Off);
            assert_eq!(i.state().last_trip, Some(TripReason::External));
            assert!(all_zero(i.sink()));
            assert!(i
                .sink()
                .writes
                .iter()
                .rev()
                .take(3)
                .all(|w| w.polarity == Polarity::Normal));
        }
    }

    #[test]
    fn on_then_off_leaves_outputs_zero() {
        let control = Control::new();
        let mut i = inverter(&control);

        control.request_on().unwrap();
        control.request_off();
        control.tick().unwrap();
        i.process();

        assert_eq!(i.state().mode, Mode::Off);
        assert!(!i.timer().running);
        assert!(!control.permit());
        assert!(i.sink().writes.iter().all(|w| w.pulse_ns == 0));
        assert!(all_zero(i.sink()));
        assert_eq!(i.state().last_trip, None);

        // Stray ticks after the fact are skipped.
        control.tick().unwrap();
        i.process();
        assert!(i.sink().writes.iter().all(|w| w.pulse_ns == 0));
    }

    #[test]
    fn queued_ticks_skipped_after_trip() {
        let control = Control::new();
        let mut i = inverter(&control);

        control.request_on().unwrap();
        i.process();
        let steps = i.state().steps;

        control.tick().unwrap();
        control.trip(TripReason::Requested);
        i.process();

        // The trip revoked the permit when it was posted, the queued tick never ran.
        assert_eq!(i.state().steps, steps);
        assert!(all_zero(i.sink()));
    }

    /// Trips from the sink on the n-th write, like an interrupt preempting the worker.
    struct TrippingSink<'a> {
        control: &'a Control,
        inner: Recorder,
        at: usize,
    }

    impl<'a> PwmSink for TrippingSink<'a> {
        type Error = PwmFault;

        fn set(
            &mut self,
            channel: Channel,
            carrier_hz: u32,
            pulse_ns: u32,
            polarity: Polarity,
        ) -> Result<(), PwmFault> {
            if self.inner.writes.len() == self.at {
                self.control.trip(TripReason::External);
            }
            self.inner.set(channel, carrier_hz, pulse_ns, polarity)
        }
    }

    #[test]
    fn defensive_trip() {
        let control = Control::new();
        let sink = TrippingSink {
            control: &control,
            inner: Recorder::default(),
            // Three zeroing writes at start-up, then during the pair of phase 0.
            at: 4,
        };
        let mut i =
            Inverter::new(&control, sink, MockTimer::default(), PwmConfig::default()).unwrap();

        control.request_on().unwrap();

        // RequestOn, Tick (actuates, then trips defensively), Trip(External).
        assert_eq!(i.process(), 3);

        let w = &i.sink().inner;
        assert_eq!(w.writes.len(), 3 + 3 + 3 + 3);
        assert!(w.writes[3..6].iter().any(|w| w.pulse_ns != 0));
        assert!(w.writes[6..].iter().all(|w| w.pulse_ns == 0));
        assert!(!control.permit());
        assert!(!i.timer().running);
        assert_eq!(i.state().last_trip, Some(TripReason::External));
    }

    #[test]
    fn latched_trip_flushes_queue() {
        let control = Control::new();
        let mut i = inverter(&control);

        control.request_on().unwrap();
        i.process();

        for _ in 0..EVENTQ_SZ {
            control.tick().unwrap();
        }
        assert_eq!(control.tick(), Err(InverterError::QueueFull));

        control.trip(TripReason::Disconnected);
        assert!(control.latched());

        let steps = i.state().steps;
        assert_eq!(i.process(), 1);

        assert!(!control.latched());
        assert_eq!(i.state().steps, steps);
        assert_eq!(i.state().mode, Mode::Off);
        assert_eq!(i.state().last_trip, Some(TripReason::Disconnected));
        assert!(all_zero(i.sink()));
    }

    #[test]
    fn request_off_latches_when_full() {
        let control = Control::new();
        let mut i = inverter(&control);

        control.request_on().unwrap();
        i.process();

        for _ in 0..EVENTQ_SZ {
            control.tick().unwrap();
        }
        control.request_off();
        assert!(control.latched());
        i.process();

        // Same outcome as a queued off request.
        assert_eq!(i.state().mode, Mode::Off);
        assert_eq!(i.state().last_trip, None);
        assert!(!control.permit());
        assert!(!i.timer().running);
        assert!(all_zero(i.sink()));
    }

    #[test]
    fn latched_trip_wins_over_latched_off() {
        let control = Control::new();
        let mut i = inverter(&control);

        control.request_on().unwrap();
        i.process();

        for _ in 0..EVENTQ_SZ {
            control.tick().unwrap();
        }
        control.trip(TripReason::External);
        control.request_off();
        i.process();

        assert_eq!(i.state().mode, Mode::Off);
        assert_eq!(i.state().last_trip, Some(TripReason::External));
    }

    #[test]
    fn latched_trip_keeps_duty_update() {
        let control = Control::new();
        let mut i = inverter(&control);

        control.request_on().unwrap();
        i.process();

        control.set_duty(0.4, 0.5).unwrap();
        for _ in 1..EVENTQ_SZ {
            control.tick().unwrap();
        }
        control.trip(TripReason::External);
        assert!(control.latched());

        let steps = i.state().steps;
        i.process();

        assert_eq!(i.state().mode, Mode::Off);
        assert_eq!(i.state().last_trip, Some(TripReason::External));
        assert_eq!(i.state().steps, steps);
        assert_eq!(i.state().duty_average, 0.4);
        assert_eq!(i.state().duty_range, 0.5);
        assert_eq!(i.table().average(), 0.4);

        // The next start runs the updated table.
        control.request_on().unwrap();
        i.process();
        assert_eq!(i.sink().last(Channel::Reference), Some(40_000));
    }

    #[test]
    fn set_duty() {
        let control = Control::new();
        let mut i = inverter(&control);

        assert_eq!(
            i.handle(Event::SetDuty {
                average: 0.7,
                range: 0.9
            }),
            Err(InverterError::InvalidDuty)
        );
        assert_eq!(i.state().duty_average, 0.5);

        control.set_duty(0.4, 0.5).unwrap();
        control.request_on().unwrap();
        i.process();

        assert_eq!(i.state().duty_average, 0.4);
        assert_eq!(i.state().duty_range, 0.5);
        assert_eq!(i.table().average(), 0.4);
        assert_eq!(i.sink().last(Channel::Reference), Some(40_000));
    }

    #[test]
    fn zeroing_failure_does_not_block_trip() {
        let control = Control::new();
        let mut i = inverter(&control);

        control.request_on().unwrap();
        i.process();

        i.sink_mut().fail = Some((Channel::LowSide, 2));
        i.trip(TripReason::External);

        assert_eq!(i.state().mode, Mode::Off);
        assert!(!control.permit());
        assert_eq!(i.sink().last(Channel::HighSide), Some(0));
        assert_eq!(i.sink().last(Channel::Reference), Some(0));
    }
}
