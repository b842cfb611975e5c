//! Device-side state machine.
//!
//! Owns the single `DeviceState`, applies decoded commands, advances the
//! lifecycle and the decay model, and queues outbound messages for the
//! runtime to put on the wire. Actuator intent is tracked separately from
//! the physical outputs: intent changes only on a command or the limit
//! transition, and a failing actuator never rolls intent back.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tetra_traits::{Actuator, Display};
use tracing::{debug, info, warn};

use crate::codec::{Command, Confirmation, Field, StatusLine};
use crate::decay::{Measurands, SensorDecayModel, TerminalLatch};
use crate::hw_error::map_hw_error;
use crate::status::LifecyclePhase;
use crate::util::secs_f32;

/// Commanded actuator state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuatorIntent {
    pub pump1: bool,
    pub pump2: bool,
    /// true = moved
    pub servo: bool,
}

impl ActuatorIntent {
    /// Intent for an actuator field; `None` for `system`.
    pub fn get(&self, field: Field) -> Option<bool> {
        match field {
            Field::Pump1 => Some(self.pump1),
            Field::Pump2 => Some(self.pump2),
            Field::Servo => Some(self.servo),
            Field::System => None,
        }
    }

    pub fn pumps(&self) -> [bool; 2] {
        [self.pump1, self.pump2]
    }

    fn set(&mut self, field: Field, on: bool) {
        match field {
            Field::Pump1 => self.pump1 = on,
            Field::Pump2 => self.pump2 = on,
            Field::Servo => self.servo = on,
            Field::System => {}
        }
    }
}

/// Everything the device knows about the current cycle.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub phase: LifecyclePhase,
    /// Set on Idle → WarmUp; used for the cycle summary
    pub cycle_started_at: Option<Instant>,
    /// Set on entering Running; drives decay
    pub run_started_at: Option<Instant>,
    pub measurands: Measurands,
    pub intent: ActuatorIntent,
    latch: TerminalLatch,
    last_tick: Option<Instant>,
}

impl DeviceState {
    fn new(initial: Measurands) -> Self {
        Self {
            phase: LifecyclePhase::Idle,
            cycle_started_at: None,
            run_started_at: None,
            measurands: initial,
            intent: ActuatorIntent::default(),
            latch: TerminalLatch::default(),
            last_tick: None,
        }
    }

    pub fn terminal_latched(&self) -> bool {
        self.latch.is_latched()
    }
}

/// Physical outputs behind the intent bits.
pub struct ActuatorBank {
    pump1: Box<dyn Actuator + Send>,
    pump2: Box<dyn Actuator + Send>,
    servo: Box<dyn Actuator + Send>,
}

impl ActuatorBank {
    pub fn new(
        pump1: Box<dyn Actuator + Send>,
        pump2: Box<dyn Actuator + Send>,
        servo: Box<dyn Actuator + Send>,
    ) -> Self {
        Self {
            pump1,
            pump2,
            servo,
        }
    }

    /// Drive one output. Failures are logged; the caller keeps its intent.
    fn drive(&mut self, field: Field, on: bool) {
        let actuator = match field {
            Field::Pump1 => &mut self.pump1,
            Field::Pump2 => &mut self.pump2,
            Field::Servo => &mut self.servo,
            Field::System => return,
        };
        if let Err(e) = actuator.apply(on) {
            let err = map_hw_error(e.as_ref());
            warn!(field = field.key(), on, error = %err, "actuator failed; intent kept");
        }
    }
}

impl Default for ActuatorBank {
    fn default() -> Self {
        use crate::mocks::NoopActuator;
        Self::new(
            Box::new(NoopActuator),
            Box::new(NoopActuator),
            Box::new(NoopActuator),
        )
    }
}

impl std::fmt::Debug for ActuatorBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuatorBank").finish_non_exhaustive()
    }
}

/// Messages produced by the state machine, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Confirmation(Confirmation),
    /// Full status pushed outside the periodic cadence
    Status(StatusLine),
    /// Final cycle summary (local display only)
    Summary { cycle: Duration },
}

pub struct DeviceStateMachine {
    state: DeviceState,
    model: SensorDecayModel,
    warmup: Duration,
    actuators: ActuatorBank,
    display: Option<Box<dyn Display + Send>>,
    outbound: VecDeque<Outbound>,
}

impl std::fmt::Debug for DeviceStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStateMachine")
            .field("phase", &self.state.phase)
            .field("intent", &self.state.intent)
            .field("measurands", &self.state.measurands)
            .field("queued", &self.outbound.len())
            .finish()
    }
}

impl DeviceStateMachine {
    pub fn new(
        model: SensorDecayModel,
        warmup: Duration,
        actuators: ActuatorBank,
        display: Option<Box<dyn Display + Send>>,
    ) -> Self {
        let mut sm = Self {
            state: DeviceState::new(model.initial()),
            model,
            warmup,
            actuators,
            display,
            outbound: VecDeque::new(),
        };
        sm.show_phase();
        sm
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.state.phase
    }

    /// Apply every recognized field, queueing one confirmation per field.
    /// Returns the number of confirmations queued.
    pub fn apply_command(&mut self, cmd: &Command, now: Instant) -> usize {
        let mut confirmed = 0;
        for (field, value) in cmd.fields() {
            let post = match field {
                Field::System => {
                    if value {
                        if self.state.phase == LifecyclePhase::Idle {
                            self.begin_cycle(now);
                        } else {
                            debug!(phase = %self.state.phase, "system=1 while active");
                        }
                    } else {
                        self.reset();
                    }
                    self.state.phase.is_active()
                }
                _ => {
                    if self.state.intent.get(field) != Some(value) {
                        self.state.intent.set(field, value);
                        self.actuators.drive(field, value);
                        info!(field = field.key(), on = value, "intent changed");
                    }
                    value
                }
            };
            let pumps = self.state.intent.pumps();
            self.outbound.push_back(Outbound::Confirmation(Confirmation {
                field,
                value: post,
                pumps,
            }));
            confirmed += 1;
        }
        if confirmed == 0 {
            debug!("command carried no recognized field");
        }
        confirmed
    }

    /// Physical start button. Only acts while Idle.
    pub fn start_signal(&mut self, now: Instant) -> bool {
        if self.state.phase != LifecyclePhase::Idle {
            return false;
        }
        self.begin_cycle(now);
        true
    }

    /// Advance lifecycle and decay to `now`.
    pub fn advance(&mut self, now: Instant) {
        let elapsed = self
            .state
            .last_tick
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
        self.state.last_tick = Some(now);

        match self.state.phase {
            LifecyclePhase::Idle | LifecyclePhase::FinalDisplayed => {}
            LifecyclePhase::WarmUp => {
                let started = self.state.cycle_started_at.unwrap_or(now);
                if now.saturating_duration_since(started) >= self.warmup {
                    self.enter_running(now);
                }
            }
            LifecyclePhase::Running => {
                let started = self.state.run_started_at.unwrap_or(now);
                let run_s = secs_f32(now.saturating_duration_since(started));
                let terminal = self.model.tick(
                    &mut self.state.measurands,
                    &mut self.state.latch,
                    run_s,
                    secs_f32(elapsed),
                );
                if terminal {
                    self.enter_limit();
                }
            }
            LifecyclePhase::LimitReached => {
                let cycle = self
                    .state
                    .cycle_started_at
                    .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
                self.state.phase = LifecyclePhase::FinalDisplayed;
                info!(cycle_s = cycle.as_secs(), "cycle complete");
                if let Some(d) = self.display.as_mut() {
                    d.show_summary(cycle);
                }
                self.outbound.push_back(Outbound::Summary { cycle });
            }
        }
    }

    /// Full status from tracked intent.
    pub fn status_line(&self) -> StatusLine {
        StatusLine::new(
            &self.state.measurands,
            self.state.intent.pumps(),
            self.state.intent.servo,
            self.state.phase.is_active(),
        )
    }

    /// Push current readings to the display, if any.
    pub fn refresh_display(&mut self) {
        let m = self.state.measurands;
        if let Some(d) = self.display.as_mut() {
            d.show_readings(m.tds, m.turbidity, m.ph);
        }
    }

    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        self.outbound.drain(..).collect()
    }

    fn begin_cycle(&mut self, now: Instant) {
        self.state.phase = LifecyclePhase::WarmUp;
        self.state.cycle_started_at = Some(now);
        self.state.run_started_at = None;
        self.state.measurands = self.model.initial();
        self.state.latch.reset();
        info!(warmup_s = self.warmup.as_secs(), "cycle started");
        self.show_phase();
    }

    fn enter_running(&mut self, now: Instant) {
        self.state.phase = LifecyclePhase::Running;
        self.state.run_started_at = Some(now);
        if let Some(d) = self.display.as_mut() {
            d.clear();
        }
        info!("warm-up finished; decay running");
        self.show_phase();
    }

    fn enter_limit(&mut self) {
        self.state.phase = LifecyclePhase::LimitReached;
        self.state.measurands = self.model.limits();
        if !self.state.intent.servo {
            self.state.intent.servo = true;
            self.actuators.drive(Field::Servo, true);
        }
        info!(tds = self.state.measurands.tds, "limit reached; servo moved");
        self.show_phase();
        let status = self.status_line();
        self.outbound.push_back(Outbound::Status(status));
    }

    /// `system=0`: phase and measurands back to start, intents untouched.
    fn reset(&mut self) {
        self.state.phase = LifecyclePhase::Idle;
        self.state.cycle_started_at = None;
        self.state.run_started_at = None;
        self.state.measurands = self.model.initial();
        self.state.latch.reset();
        info!("system reset");
        self.show_phase();
    }

    fn show_phase(&mut self) {
        let phase = self.state.phase;
        if let Some(d) = self.display.as_mut() {
            d.show_phase(phase.as_str());
        }
    }
}
