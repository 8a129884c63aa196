/// Cross-thread handoff between the polling loop and the tick thread
///
/// The polling loop is the only writer of [`SelectionCell`] and the tick the
/// only reader; the tick picks up at most one selection per period. Status
/// flows the other way through [`StatusBoard`] atomics. Neither side locks.

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

use crate::tables::Ratio;

/// Everything the engine needs from the panel, applied as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSelection {
    pub ratio: Option<Ratio>,
    pub reverse: bool,
    pub enabled: bool,
}

/// Latest-value mailbox: a newer selection replaces one the tick has not
/// consumed yet.
#[derive(Debug)]
pub struct SelectionCell {
    slot: ArrayQueue<PendingSelection>,
}

impl Default for SelectionCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionCell {
    pub fn new() -> Self {
        Self {
            slot: ArrayQueue::new(1),
        }
    }

    pub fn publish(&self, selection: PendingSelection) {
        if self.slot.force_push(selection).is_some() {
            log::trace!(target: "handoff", "replaced unconsumed selection");
        }
    }

    pub fn take(&self) -> Option<PendingSelection> {
        self.slot.pop()
    }
}

/// Snapshot of engine state for the panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatus {
    pub rpm: u16,
    pub position: u32,
    pub alarm: bool,
    pub enabled: bool,
}

#[derive(Debug, Default)]
pub struct StatusBoard {
    rpm: AtomicU16,
    position: AtomicU32,
    alarm: AtomicBool,
    enabled: AtomicBool,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, status: EngineStatus) {
        self.rpm.store(status.rpm, Ordering::Relaxed);
        self.position.store(status.position, Ordering::Relaxed);
        self.alarm.store(status.alarm, Ordering::Relaxed);
        self.enabled.store(status.enabled, Ordering::Release);
    }

    pub fn snapshot(&self) -> EngineStatus {
        let enabled = self.enabled.load(Ordering::Acquire);
        EngineStatus {
            rpm: self.rpm.load(Ordering::Relaxed),
            position: self.position.load(Ordering::Relaxed),
            alarm: self.alarm.load(Ordering::Relaxed),
            enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(enabled: bool) -> PendingSelection {
        PendingSelection {
            ratio: Ratio::new(1, 2),
            reverse: false,
            enabled,
        }
    }

    #[test]
    fn newest_selection_wins() {
        let cell = SelectionCell::new();
        cell.publish(selection(false));
        cell.publish(selection(true));
        assert_eq!(cell.take(), Some(selection(true)));
        assert_eq!(cell.take(), None);
    }

    #[test]
    fn status_round_trips() {
        let board = StatusBoard::new();
        let status = EngineStatus { rpm: 450, position: 1234, alarm: true, enabled: false };
        board.publish(status);
        assert_eq!(board.snapshot(), status);
    }
}
