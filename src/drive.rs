/// Hardware collaborators of the synchronization engine
///
/// The engine only sees these traits. Real register-level drivers live
/// behind them; the simulated implementations here back `--simulate` runs
/// and the tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Spindle rotation encoder with a wrapping counter.
pub trait Encoder {
    /// Current count, in `0..max_count()`.
    fn position(&self) -> u32;
    /// Counter range; the count wraps to 0 after `max_count() - 1`.
    fn max_count(&self) -> u32;
    fn rpm(&self) -> u16;
}

/// Stepper or servo drive consuming microstep positions.
pub trait StepperDrive {
    fn set_desired_position(&mut self, steps: i32);
    /// Redefine where the drive thinks it is, without moving.
    fn set_current_position(&mut self, steps: i32);
    /// Shift the drive's current position, without moving.
    fn increment_current_position(&mut self, delta: i32);
    fn is_alarm(&self) -> bool;
    /// Periodic step generation.
    fn service(&mut self);
}

/// Carriage end-stop.
pub trait LimitSwitch {
    fn is_tripped(&self) -> bool;
}

/// No end-stop fitted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLimitSwitch;

impl LimitSwitch for NoLimitSwitch {
    fn is_tripped(&self) -> bool {
        false
    }
}

/// End-stop driven by a shared flag (simulation and tests).
#[derive(Debug, Default, Clone)]
pub struct FlagLimitSwitch(pub Arc<AtomicBool>);

impl LimitSwitch for FlagLimitSwitch {
    fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Spindle turning at a fixed speed, derived from wall-clock time.
#[derive(Debug)]
pub struct SimulatedSpindle {
    resolution: u32,
    max_count: u32,
    rpm: u16,
    started: Instant,
}

impl SimulatedSpindle {
    pub fn new(resolution: u32, max_count: u32, rpm: u16) -> Self {
        Self {
            resolution,
            max_count: max_count.max(1),
            rpm,
            started: Instant::now(),
        }
    }
}

impl Encoder for SimulatedSpindle {
    fn position(&self) -> u32 {
        let elapsed = self.started.elapsed().as_secs_f64();
        let counts = elapsed / 60.0 * self.rpm as f64 * self.resolution as f64;
        (counts as u64 % self.max_count as u64) as u32
    }

    fn max_count(&self) -> u32 {
        self.max_count
    }

    fn rpm(&self) -> u16 {
        self.rpm
    }
}

/// Every call the engine made on a [`SimulatedStepper`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveCall {
    SetDesired(i32),
    SetCurrent(i32),
    Increment(i32),
}

/// Stepper that slews one microstep per `service()` toward the desired
/// position and can record the calls it receives.
#[derive(Debug, Default)]
pub struct SimulatedStepper {
    pub current: i32,
    pub desired: i32,
    pub alarm: bool,
    pub max_step_per_service: i32,
    record: bool,
    calls: Vec<DriveCall>,
}

impl SimulatedStepper {
    pub fn new() -> Self {
        Self {
            max_step_per_service: 1,
            ..Self::default()
        }
    }

    /// Keep a log of every drive call (tests).
    pub fn recording() -> Self {
        Self {
            record: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> &[DriveCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<DriveCall> {
        std::mem::take(&mut self.calls)
    }

    /// Outstanding motion the drive still has to make.
    pub fn following_error(&self) -> i32 {
        self.desired.wrapping_sub(self.current)
    }

    fn log(&mut self, call: DriveCall) {
        if self.record {
            self.calls.push(call);
        }
    }
}

impl StepperDrive for SimulatedStepper {
    fn set_desired_position(&mut self, steps: i32) {
        self.desired = steps;
        self.log(DriveCall::SetDesired(steps));
    }

    fn set_current_position(&mut self, steps: i32) {
        self.current = steps;
        self.log(DriveCall::SetCurrent(steps));
    }

    fn increment_current_position(&mut self, delta: i32) {
        self.current = self.current.wrapping_add(delta);
        self.log(DriveCall::Increment(delta));
    }

    fn is_alarm(&self) -> bool {
        self.alarm
    }

    fn service(&mut self) {
        let error = self.following_error();
        let step = error.clamp(-self.max_step_per_service, self.max_step_per_service);
        self.current = self.current.wrapping_add(step);
    }
}
