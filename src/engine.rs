/// Synchronization engine
///
/// Keeps the stepper locked to the spindle at an exact ratio. Runs once per
/// control period from the tick thread and never blocks.
///
/// The commanded position is always computed from the absolute encoder
/// count, so rounding error never accumulates. Encoder counter wraparound is
/// absorbed by shifting the drive's own notion of its position. The shift
/// after `k` wraps since the last re-anchor is always exactly
/// `round(k * max_count * ratio)`, so wrap rounding does not build up either.
/// Any change of ratio, direction or enable state re-anchors
/// the drive at the new commanded position instead of letting it chase a
/// large jump.

use crate::drive::{Encoder, StepperDrive};
use crate::handoff::PendingSelection;
use crate::tables::Ratio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }
}

#[derive(Debug)]
pub struct SyncEngine<E, D> {
    encoder: E,
    drive: D,
    ratio: Option<Ratio>,
    direction: Direction,
    enabled: bool,
    resync_pending: bool,
    last_count: u32,
    /// Net counter wraps since the last re-anchor, negative going backward.
    wraps: i64,
    last_direction: Direction,
    last_ratio: Option<Ratio>,
}

impl<E: Encoder, D: StepperDrive> SyncEngine<E, D> {
    /// No active ratio and disabled; the first active tick re-anchors.
    pub fn new(encoder: E, drive: D) -> Self {
        Self {
            encoder,
            drive,
            ratio: None,
            direction: Direction::Forward,
            enabled: false,
            resync_pending: true,
            last_count: 0,
            wraps: 0,
            last_direction: Direction::Forward,
            last_ratio: None,
        }
    }

    pub fn set_ratio(&mut self, ratio: Ratio) {
        self.ratio = Some(ratio);
    }

    pub fn set_direction(&mut self, reverse: bool) {
        self.direction = Direction::from_reverse(reverse);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.resync_pending = true;
            log::debug!(target: "engine", "enabled {} -> {}", self.enabled, enabled);
        }
        self.enabled = enabled;
    }

    /// Install a selection handed over by the polling loop.
    pub fn apply(&mut self, selection: PendingSelection) {
        if let Some(ratio) = selection.ratio {
            self.set_ratio(ratio);
        }
        self.set_direction(selection.reverse);
        self.set_enabled(selection.enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ratio(&self) -> Option<Ratio> {
        self.ratio
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn rpm(&self) -> u16 {
        self.encoder.rpm()
    }

    pub fn position(&self) -> u32 {
        self.encoder.position()
    }

    pub fn is_alarm(&self) -> bool {
        self.drive.is_alarm()
    }

    pub fn drive(&self) -> &D {
        &self.drive
    }

    pub fn drive_mut(&mut self) -> &mut D {
        &mut self.drive
    }

    /// Signed microsteps for `count` encoder counts, wrapping to the drive's
    /// 32-bit position range.
    fn steps(&self, count: u32, ratio: Ratio) -> i32 {
        let magnitude = ratio.scale(count as u64) as u32 as i32;
        match self.direction {
            Direction::Forward => magnitude,
            Direction::Reverse => magnitude.wrapping_neg(),
        }
    }

    /// Signed microsteps for `wraps` full counter ranges.
    fn wrap_steps(&self, wraps: i64, ratio: Ratio) -> i32 {
        let counts = wraps.unsigned_abs() * self.encoder.max_count() as u64;
        let magnitude = ratio.scale(counts) as u32 as i32;
        let magnitude = if wraps < 0 { magnitude.wrapping_neg() } else { magnitude };
        match self.direction {
            Direction::Forward => magnitude,
            Direction::Reverse => magnitude.wrapping_neg(),
        }
    }

    /// Read the encoder and run one control period.
    pub fn service(&mut self) {
        let count = self.encoder.position();
        self.tick(count);
    }

    /// One control period at the given encoder count.
    pub fn tick(&mut self, encoder_count: u32) {
        let ratio = match self.ratio {
            Some(ratio) if self.enabled => ratio,
            _ => return,
        };

        let desired = self.steps(encoder_count, ratio);

        let half = self.encoder.max_count() / 2;
        let wraps = if encoder_count < self.last_count && self.last_count - encoder_count > half {
            // counter passed max going forward
            self.wraps + 1
        } else if encoder_count > self.last_count && encoder_count - self.last_count > half {
            // counter passed zero going backward
            self.wraps - 1
        } else {
            self.wraps
        };
        if wraps != self.wraps {
            let shift = self
                .wrap_steps(wraps, ratio)
                .wrapping_sub(self.wrap_steps(self.wraps, ratio));
            self.drive.increment_current_position(shift.wrapping_neg());
            self.wraps = wraps;
        }

        if self.resync_pending
            || self.last_ratio != Some(ratio)
            || self.last_direction != self.direction
        {
            log::debug!(
                target: "engine",
                "re-anchor at {} (ratio {}, {:?})",
                desired, ratio, self.direction
            );
            self.drive.set_current_position(desired);
            self.wraps = 0;
        }
        self.drive.set_desired_position(desired);

        self.last_count = encoder_count;
        self.last_direction = self.direction;
        self.last_ratio = Some(ratio);
        self.resync_pending = false;

        self.drive.service();
    }
}
