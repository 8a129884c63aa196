/// Touch input state machine
///
/// Pure: consumes key codes and reports what should happen as [`Effect`]s.
/// Persistence, ratio resolution and the RPM/alarm gating belong to the
/// controller.

use crate::decimal::parse_decimal;
use crate::nextion::commands::{DisplayCommand, FeedColor, Picture, POSITION_MODES};
use crate::params::ParamSlot;
use crate::tables::TableKind;

/// Longest value the operator can type.
pub const MAX_EDIT_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchCode {
    Digit(u8),
    Point,
    Backspace,
    Enter,
    ModeCycle,
    Units,
    StartStop,
    Cancel,
    PositionCycle,
    NextRow,
    PreviousRow,
    Other(u8),
}

impl From<u8> for TouchCode {
    fn from(code: u8) -> Self {
        match code {
            b'0'..=b'9' => TouchCode::Digit(code - b'0'),
            0x2E => TouchCode::Point,
            0x08 => TouchCode::Backspace,
            0x0D => TouchCode::Enter,
            0x1A => TouchCode::ModeCycle,
            0x1B => TouchCode::Units,
            0x1C => TouchCode::StartStop,
            0x1E => TouchCode::Cancel,
            0x20 => TouchCode::PositionCycle,
            0x21 => TouchCode::NextRow,
            0x22 => TouchCode::PreviousRow,
            other => TouchCode::Other(other),
        }
    }
}

impl TouchCode {
    /// Keys that would change the gearing of a turning spindle.
    pub fn changes_gearing(&self) -> bool {
        matches!(self, TouchCode::ModeCycle | TouchCode::Units | TouchCode::StartStop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    Idle,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Next,
    Previous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayState {
    pub metric: bool,
    pub feed_mode: bool,
    pub reverse: bool,
    pub edit_buffer: String,
    /// Value of the active slot as last shown.
    pub committed_value: String,
    pub in_edit: bool,
    pub position_display_mode: u8,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            metric: false,
            feed_mode: true,
            reverse: false,
            edit_buffer: String::new(),
            committed_value: String::new(),
            in_edit: false,
            position_display_mode: 0,
        }
    }
}

impl DisplayState {
    pub fn table_kind(&self) -> TableKind {
        TableKind {
            metric: self.metric,
            thread: !self.feed_mode,
        }
    }

    pub fn slot(&self) -> ParamSlot {
        ParamSlot::for_mode(self.metric, !self.feed_mode)
    }

    pub fn state(&self) -> InputState {
        if self.in_edit {
            InputState::Editing
        } else {
            InputState::Idle
        }
    }

    pub fn diagram(&self) -> Picture {
        Picture::Diagram {
            thread: !self.feed_mode,
            reverse: self.reverse,
        }
    }

    pub fn units(&self) -> Picture {
        Picture::Units {
            metric: self.metric,
            thread: !self.feed_mode,
        }
    }

    pub fn feed_color(&self) -> FeedColor {
        if self.in_edit {
            FeedColor::Editing
        } else {
            FeedColor::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Redraw(DisplayCommand),
    /// Persist a typed value into a slot.
    Commit { slot: ParamSlot, value: String },
    /// Units or mode changed; the active slot is a different one.
    SelectionChanged,
    ToggleEnabled,
    Step(StepDirection),
    RefreshPosition,
}

#[derive(Debug, Default)]
pub struct InputStateMachine {
    state: DisplayState,
}

impl InputStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: DisplayState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    /// Record the active slot's value as shown on the panel.
    pub fn sync_committed(&mut self, value: &str) {
        self.state.committed_value = value.to_string();
    }

    /// Handle one key. `enable_forced` is set when the enable state was
    /// changed by a limit switch or alarm in the current cycle.
    pub fn handle_touch(&mut self, code: u8, enable_forced: bool) -> Vec<Effect> {
        let mut effects = Vec::new();
        let s = &mut self.state;
        match TouchCode::from(code) {
            TouchCode::Digit(d) => {
                if s.edit_buffer.len() < MAX_EDIT_LEN {
                    s.edit_buffer.push(char::from(b'0' + d));
                    effects.push(Effect::Redraw(DisplayCommand::FeedText(s.edit_buffer.clone())));
                }
                Self::enter_editing(s, &mut effects);
            }
            TouchCode::Point => {
                if !s.edit_buffer.contains('.') && s.edit_buffer.len() < MAX_EDIT_LEN {
                    s.edit_buffer.push('.');
                    effects.push(Effect::Redraw(DisplayCommand::FeedText(s.edit_buffer.clone())));
                }
                Self::enter_editing(s, &mut effects);
            }
            TouchCode::Backspace => {
                if s.edit_buffer.pop().is_some() {
                    effects.push(Effect::Redraw(DisplayCommand::FeedText(s.edit_buffer.clone())));
                }
            }
            TouchCode::Enter => {
                if s.in_edit {
                    let value = std::mem::take(&mut s.edit_buffer);
                    Self::leave_editing(s, &mut effects);
                    match parse_decimal(&value) {
                        Some(v) if !v.is_zero() => effects.push(Effect::Commit {
                            slot: s.slot(),
                            value,
                        }),
                        _ => {
                            log::debug!(target: "controller", "ignoring entry '{}'", value);
                            effects.push(Effect::Redraw(DisplayCommand::FeedText(
                                s.committed_value.clone(),
                            )));
                        }
                    }
                }
            }
            TouchCode::ModeCycle => {
                if !s.in_edit {
                    (s.feed_mode, s.reverse) = match (s.feed_mode, s.reverse) {
                        (true, false) => (false, false),
                        (false, false) => (false, true),
                        (false, true) => (true, true),
                        (true, true) => (true, false),
                    };
                    effects.push(Effect::Redraw(DisplayCommand::Picture(s.diagram())));
                    effects.push(Effect::Redraw(DisplayCommand::Picture(s.units())));
                    effects.push(Effect::SelectionChanged);
                }
            }
            TouchCode::Units => {
                if !s.in_edit {
                    s.metric = !s.metric;
                    effects.push(Effect::Redraw(DisplayCommand::Picture(s.units())));
                    effects.push(Effect::SelectionChanged);
                }
            }
            TouchCode::StartStop => {
                if !enable_forced {
                    effects.push(Effect::ToggleEnabled);
                }
            }
            TouchCode::Cancel => {
                s.edit_buffer.clear();
                if s.in_edit {
                    Self::leave_editing(s, &mut effects);
                    effects.push(Effect::Redraw(DisplayCommand::FeedText(s.committed_value.clone())));
                }
            }
            TouchCode::PositionCycle => {
                s.position_display_mode = (s.position_display_mode + 1) % POSITION_MODES;
                effects.push(Effect::RefreshPosition);
            }
            TouchCode::NextRow | TouchCode::PreviousRow if s.in_edit => {}
            TouchCode::NextRow => effects.push(Effect::Step(StepDirection::Next)),
            TouchCode::PreviousRow => effects.push(Effect::Step(StepDirection::Previous)),
            TouchCode::Other(code) => {
                log::trace!(target: "controller", "unhandled touch 0x{:02X}", code);
            }
        }
        effects
    }

    fn enter_editing(s: &mut DisplayState, effects: &mut Vec<Effect>) {
        if !s.in_edit {
            s.in_edit = true;
            effects.push(Effect::Redraw(DisplayCommand::FeedColor(FeedColor::Editing)));
        }
    }

    fn leave_editing(s: &mut DisplayState, effects: &mut Vec<Effect>) {
        s.in_edit = false;
        s.edit_buffer.clear();
        effects.push(Effect::Redraw(DisplayCommand::FeedColor(FeedColor::Normal)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(m: &mut InputStateMachine, keys: &[u8]) -> Vec<Effect> {
        keys.iter().flat_map(|&k| m.handle_touch(k, false)).collect()
    }

    fn feed_text(effects: &[Effect]) -> Option<&str> {
        effects.iter().rev().find_map(|e| match e {
            Effect::Redraw(DisplayCommand::FeedText(t)) => Some(t.as_str()),
            _ => None,
        })
    }

    #[test]
    fn typing_enters_edit_and_colours_once() {
        let mut m = InputStateMachine::new();
        let effects = press(&mut m, b"1.5");
        let colours = effects
            .iter()
            .filter(|e| matches!(e, Effect::Redraw(DisplayCommand::FeedColor(_))))
            .count();
        assert_eq!(colours, 1);
        assert_eq!(feed_text(&effects), Some("1.5"));
        assert_eq!(m.state().state(), InputState::Editing);
    }

    #[test]
    fn enter_commits_to_active_slot() {
        let mut m = InputStateMachine::new();
        press(&mut m, &[0x1A]);
        let effects = press(&mut m, &[b'1', b'.', b'5', 0x0D]);
        assert!(effects.contains(&Effect::Commit {
            slot: ParamSlot::ImperialThread,
            value: "1.5".into()
        }));
        assert!(effects.contains(&Effect::Redraw(DisplayCommand::FeedColor(FeedColor::Normal))));
        assert_eq!(m.state().state(), InputState::Idle);
        assert!(m.state().edit_buffer.is_empty());
    }

    #[test]
    fn zero_entry_acts_as_cancel() {
        let mut m = InputStateMachine::new();
        m.sync_committed(".005");
        let effects = press(&mut m, &[b'0', b'.', 0x0D]);
        assert!(!effects.iter().any(|e| matches!(e, Effect::Commit { .. })));
        assert_eq!(feed_text(&effects), Some(".005"));
    }

    #[test]
    fn buffer_is_bounded_and_single_point() {
        let mut m = InputStateMachine::new();
        press(&mut m, b"1.2.3456789");
        assert_eq!(m.state().edit_buffer, "1.2345");
    }

    #[test]
    fn backspace_and_cancel() {
        let mut m = InputStateMachine::new();
        m.sync_committed("20");
        let effects = press(&mut m, &[b'1', b'2', 0x08]);
        assert_eq!(feed_text(&effects), Some("1"));
        let effects = press(&mut m, &[0x1E]);
        assert_eq!(feed_text(&effects), Some("20"));
        assert_eq!(m.state().state(), InputState::Idle);
        // idle cancel changes nothing
        assert!(press(&mut m, &[0x1E]).is_empty());
    }

    #[test]
    fn mode_cycle_order() {
        let mut m = InputStateMachine::new();
        let mut seen = Vec::new();
        for _ in 0..4 {
            press(&mut m, &[0x1A]);
            seen.push((m.state().feed_mode, m.state().reverse));
        }
        assert_eq!(seen, vec![(false, false), (false, true), (true, true), (true, false)]);
    }

    #[test]
    fn mode_keys_ignored_while_editing() {
        let mut m = InputStateMachine::new();
        press(&mut m, b"3");
        assert!(press(&mut m, &[0x1A, 0x1B, 0x21, 0x22]).is_empty());
        assert!(m.state().feed_mode);
        assert!(!m.state().metric);
    }

    #[test]
    fn units_toggle_changes_slot() {
        let mut m = InputStateMachine::new();
        let effects = press(&mut m, &[0x1B]);
        assert!(effects.contains(&Effect::SelectionChanged));
        assert_eq!(m.state().slot(), ParamSlot::MetricFeed);
        assert!(effects.contains(&Effect::Redraw(DisplayCommand::Picture(Picture::Units {
            metric: true,
            thread: false
        }))));
    }

    #[test]
    fn start_stop_suppressed_after_forced_change() {
        let mut m = InputStateMachine::new();
        assert_eq!(m.handle_touch(0x1C, false), vec![Effect::ToggleEnabled]);
        assert!(m.handle_touch(0x1C, true).is_empty());
    }

    #[test]
    fn position_mode_wraps() {
        let mut m = InputStateMachine::new();
        press(&mut m, &[0x20; 6]);
        assert_eq!(m.state().position_display_mode, 0);
        press(&mut m, &[0x20; 2]);
        assert_eq!(m.state().position_display_mode, 2);
    }

    #[test]
    fn unknown_codes_are_ignored() {
        let mut m = InputStateMachine::new();
        assert!(press(&mut m, &[0x1D, 0x1F, 0x7F]).is_empty());
        assert_eq!(m.state(), &DisplayState::default());
    }

    #[test]
    fn gearing_keys() {
        assert!(TouchCode::from(0x1A).changes_gearing());
        assert!(TouchCode::from(0x1C).changes_gearing());
        assert!(!TouchCode::from(0x21).changes_gearing());
        assert!(!TouchCode::from(b'7').changes_gearing());
    }
}
