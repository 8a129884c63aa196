/// Panel controller
///
/// Runs on the polling loop: reads panel messages, gates them on spindle
/// speed and alarm state, feeds them to the input state machine, carries out
/// the resulting effects and keeps the live readouts current. Whenever the
/// gearing changes it hands back a new [`PendingSelection`] for the tick.

use anyhow::Result;
use std::time::Duration;

use crate::handoff::{EngineStatus, PendingSelection};
use crate::input::{DisplayState, Effect, InputStateMachine, StepDirection, TouchCode};
use crate::nextion::commands::{format_position, DisplayCommand, Picture};
use crate::nextion::framing::PanelMessage;
use crate::nextion::link::{Panel, PanelLink};
use crate::params::{ParameterSet, ParameterStore, ParamSlot};
use crate::tables::{MachineGeometry, Ratio, RatioTableCatalog};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub encoder_resolution: u32,
    pub ready_timeout: Duration,
    pub credits: String,
}

/// What the panel currently shows for the fields refreshed every cycle.
#[derive(Debug, Default)]
struct Shown {
    rpm: Option<u16>,
    position: Option<String>,
    alarm: Option<bool>,
    enabled: Option<bool>,
}

pub struct PanelController<L> {
    panel: Panel<L>,
    input: InputStateMachine,
    store: ParameterStore,
    catalog: RatioTableCatalog,
    geometry: MachineGeometry,
    settings: ControllerSettings,
    enabled: bool,
    shown: Shown,
}

impl<L: PanelLink> PanelController<L> {
    pub fn new(
        panel: Panel<L>,
        store: ParameterStore,
        catalog: RatioTableCatalog,
        geometry: MachineGeometry,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            panel,
            input: InputStateMachine::new(),
            store,
            catalog,
            geometry,
            settings,
            enabled: false,
            shown: Shown::default(),
        }
    }

    pub fn state(&self) -> &DisplayState {
        self.input.state()
    }

    pub fn params(&self) -> &ParameterSet {
        self.store.params()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn catalog(&self) -> &RatioTableCatalog {
        &self.catalog
    }

    pub fn panel(&self) -> &Panel<L> {
        &self.panel
    }

    pub fn panel_mut(&mut self) -> &mut Panel<L> {
        &mut self.panel
    }

    /// Wait for the panel, restore parameters and draw everything.
    pub fn start(&mut self) -> Result<PendingSelection> {
        if self.panel.wait_ready(self.settings.ready_timeout)? {
            log::info!(target: "controller", "panel ready");
        } else {
            log::warn!(
                target: "controller",
                "no ready message within {:?}, continuing",
                self.settings.ready_timeout
            );
        }
        self.store.restore_params(&mut self.panel)?;
        for slot in ParamSlot::ALL {
            if let Some(value) = self.store.get(slot).value() {
                self.catalog.table_mut(slot.kind()).seek(&value);
            }
        }
        let active = self.store.get(self.state().slot()).text().to_string();
        self.input.sync_committed(&active);
        self.redisplay()?;
        Ok(self.selection())
    }

    /// Ratio for the active slot, falling back to the table cursor.
    pub fn active_ratio(&self) -> Option<Ratio> {
        let slot = self.state().slot();
        self.store
            .get(slot)
            .value()
            .and_then(|v| self.geometry.ratio_for(slot.kind(), v))
            .or_else(|| Some(self.catalog.table(slot.kind()).current().ratio))
    }

    pub fn selection(&self) -> PendingSelection {
        PendingSelection {
            ratio: self.active_ratio(),
            reverse: self.state().reverse,
            enabled: self.enabled,
        }
    }

    /// One polling cycle. Returns a selection when the gearing changed.
    pub fn update(&mut self, status: EngineStatus, limit_tripped: bool) -> Result<Option<PendingSelection>> {
        let mut changed = false;
        let mut enable_forced = false;

        if (status.alarm || limit_tripped) && self.enabled {
            log::warn!(
                target: "controller",
                "disabling: {}",
                if status.alarm { "drive alarm" } else { "limit switch" }
            );
            self.enabled = false;
            enable_forced = true;
            changed = true;
        }

        for message in self.panel.poll()? {
            match message {
                PanelMessage::Ready => {
                    log::info!(target: "controller", "panel restarted, redrawing");
                    self.redisplay()?;
                }
                PanelMessage::Touch(code) => {
                    if status.alarm {
                        log::debug!(target: "controller", "alarm active, ignoring touch 0x{:02X}", code);
                        continue;
                    }
                    if TouchCode::from(code).changes_gearing() && status.rpm != 0 {
                        log::debug!(
                            target: "controller",
                            "spindle at {} rpm, ignoring touch 0x{:02X}",
                            status.rpm, code
                        );
                        continue;
                    }
                    for effect in self.input.handle_touch(code, enable_forced) {
                        changed |= self.apply(effect, limit_tripped)?;
                    }
                }
                other => log::trace!(target: "controller", "stray {:?}", other),
            }
        }

        self.refresh(&status)?;
        Ok(changed.then(|| self.selection()))
    }

    /// Carry out one effect; true if the gearing changed.
    fn apply(&mut self, effect: Effect, limit_tripped: bool) -> Result<bool> {
        match effect {
            Effect::Redraw(command) => {
                self.panel.send(&command)?;
                Ok(false)
            }
            Effect::Commit { slot, value } => match self.store.commit(&mut self.panel, slot, &value) {
                Ok(()) => {
                    if let Some(v) = self.store.get(slot).value() {
                        self.catalog.table_mut(slot.kind()).seek(&v);
                    }
                    self.show_value(&value)?;
                    Ok(true)
                }
                Err(e) => {
                    log::warn!(target: "params", "commit failed: {:#}", e);
                    let previous = self.state().committed_value.clone();
                    self.panel.send(&DisplayCommand::FeedText(previous))?;
                    Ok(false)
                }
            },
            Effect::SelectionChanged => {
                let slot = self.state().slot();
                let table = self.catalog.table_mut(slot.kind());
                match self.store.get(slot).value() {
                    Some(v) if table.seek(&v) => {}
                    // typed value off the table: cursor back to the default row
                    _ => table.reset(),
                }
                let value = self.store.get(slot).text().to_string();
                self.show_value(&value)?;
                Ok(true)
            }
            Effect::ToggleEnabled => {
                if !self.enabled && limit_tripped {
                    log::debug!(target: "controller", "limit switch tripped, not enabling");
                    return Ok(false);
                }
                self.enabled = !self.enabled;
                log::info!(target: "controller", "enabled: {}", self.enabled);
                Ok(true)
            }
            Effect::Step(direction) => {
                let slot = self.state().slot();
                let table = self.catalog.table_mut(slot.kind());
                let entry = match direction {
                    StepDirection::Next => table.advance(),
                    StepDirection::Previous => table.retreat(),
                };
                let label = entry.label.clone();
                self.store.set_value(slot, &label);
                self.show_value(&label)?;
                Ok(true)
            }
            Effect::RefreshPosition => {
                self.shown.position = None;
                Ok(false)
            }
        }
    }

    fn show_value(&mut self, value: &str) -> Result<()> {
        self.input.sync_committed(value);
        self.panel.send(&DisplayCommand::FeedText(value.to_string()))
    }

    /// Static fields now, live fields on the next refresh.
    fn redisplay(&mut self) -> Result<()> {
        let state = self.state().clone();
        let text = if state.in_edit {
            state.edit_buffer.clone()
        } else {
            state.committed_value.clone()
        };
        self.panel.send(&DisplayCommand::FeedText(text))?;
        self.panel.send(&DisplayCommand::FeedColor(state.feed_color()))?;
        self.panel.send(&DisplayCommand::Picture(state.diagram()))?;
        self.panel.send(&DisplayCommand::Picture(state.units()))?;
        self.panel.send(&DisplayCommand::Credits(self.settings.credits.clone()))?;
        self.shown = Shown::default();
        Ok(())
    }

    fn refresh(&mut self, status: &EngineStatus) -> Result<()> {
        if self.shown.rpm != Some(status.rpm) {
            self.panel.send(&DisplayCommand::Rpm(status.rpm))?;
            self.shown.rpm = Some(status.rpm);
        }
        let position = format_position(
            status.position,
            self.settings.encoder_resolution,
            self.state().position_display_mode,
        );
        if self.shown.position.as_deref() != Some(position.as_str()) {
            self.panel.send(&DisplayCommand::Position(position.clone()))?;
            self.shown.position = Some(position);
        }
        if self.shown.alarm != Some(status.alarm) {
            self.panel.send(&DisplayCommand::Alarm(status.alarm))?;
            self.shown.alarm = Some(status.alarm);
        }
        if self.shown.enabled != Some(self.enabled) {
            self.panel.send(&DisplayCommand::Picture(Picture::Enabled(self.enabled)))?;
            self.shown.enabled = Some(self.enabled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nextion::sim::{PanelHandle, SimulatedPanel};
    use crate::tables::Leadscrew;

    fn controller() -> (PanelController<SimulatedPanel>, PanelHandle) {
        let geometry = MachineGeometry {
            encoder_resolution: 4096,
            stepper_resolution: 200,
            microsteps: 8,
            leadscrew: Leadscrew::Tpi(12),
        };
        let catalog = RatioTableCatalog::standard(&geometry).unwrap();
        let store = ParameterStore::new(ParameterSet::factory(&catalog), 0, Duration::from_millis(20));
        let (sim, handle) = SimulatedPanel::new();
        let settings = ControllerSettings {
            encoder_resolution: 4096,
            ready_timeout: Duration::from_millis(5),
            credits: "test".into(),
        };
        let c = PanelController::new(Panel::new(sim), store, catalog, geometry, settings);
        (c, handle)
    }

    fn idle() -> EngineStatus {
        EngineStatus::default()
    }

    #[test]
    fn start_restores_and_draws() {
        let (mut c, handle) = controller();
        handle.ready();
        let sel = c.start().unwrap();
        assert!(!sel.enabled);
        assert!(sel.ratio.is_some());
        assert_eq!(handle.last("t1.txt"), Some("t1.txt=\".005\"".into()));
        assert_eq!(handle.last("t2.txt"), Some("t2.txt=\"test\"".into()));
        assert_eq!(handle.last("p0.pic"), Some("p0.pic=4".into()));
    }

    #[test]
    fn start_stop_toggles_when_stopped() {
        let (mut c, handle) = controller();
        c.start().unwrap();
        handle.touch(0x1C);
        let sel = c.update(idle(), false).unwrap().unwrap();
        assert!(sel.enabled);
        assert_eq!(handle.last("p2.pic"), Some("p2.pic=11".into()));
    }

    #[test]
    fn limit_switch_forces_disable_and_eats_start_stop() {
        let (mut c, handle) = controller();
        c.start().unwrap();
        handle.touch(0x1C);
        c.update(idle(), false).unwrap();
        assert!(c.is_enabled());

        handle.touch(0x1C);
        let sel = c.update(idle(), true).unwrap().unwrap();
        assert!(!sel.enabled);
        // still tripped: the switch keeps it off
        handle.touch(0x1C);
        assert_eq!(c.update(idle(), true).unwrap(), None);
        assert!(!c.is_enabled());
    }

    #[test]
    fn step_keys_move_through_table() {
        let (mut c, handle) = controller();
        c.start().unwrap();
        handle.take_received();
        handle.touch(0x21);
        let sel = c.update(idle(), false).unwrap();
        assert!(sel.is_some());
        assert_eq!(c.params().get(ParamSlot::ImperialFeed).text(), c.catalog().lookup(false, false).current().label);
        assert_eq!(c.catalog().lookup(false, false).selected_index(), 5);
        // in memory only
        let received = handle.take_received();
        assert!(!received.iter().any(|l| l.starts_with("wept")));
    }

    #[test]
    fn table_switch_resets_cursor_for_off_table_value() {
        let (mut c, handle) = controller();
        c.start().unwrap();
        for key in [0x21, 0x21] {
            handle.touch(key);
        }
        c.update(idle(), false).unwrap();
        assert_eq!(c.catalog().lookup(false, false).selected_index(), 6);

        for key in [b'.', b'0', b'0', b'5', b'5', 0x0D] {
            handle.touch(key);
        }
        c.update(idle(), false).unwrap();
        assert_eq!(c.params().get(ParamSlot::ImperialFeed).text(), ".0055");
        assert_eq!(c.catalog().lookup(false, false).selected_index(), 6);

        // to metric and back
        handle.touch(0x1B);
        handle.touch(0x1B);
        c.update(idle(), false).unwrap();
        assert_eq!(c.catalog().lookup(false, false).selected_index(), 4);
        assert_eq!(c.catalog().lookup(true, false).current().label, ".12");
    }

    #[test]
    fn table_switch_keeps_cursor_on_matching_row() {
        let (mut c, handle) = controller();
        c.start().unwrap();
        handle.touch(0x21);
        c.update(idle(), false).unwrap();
        handle.touch(0x1B);
        handle.touch(0x1B);
        c.update(idle(), false).unwrap();
        assert_eq!(c.catalog().lookup(false, false).current().label, ".006");
    }

    #[test]
    fn failed_commit_restores_display() {
        let (mut c, handle) = controller();
        c.start().unwrap();
        handle.set_ack_writes(false);
        for key in [b'2', 0x0D] {
            handle.touch(key);
        }
        assert_eq!(c.update(idle(), false).unwrap(), None);
        assert_eq!(c.params().get(ParamSlot::ImperialFeed).text(), ".005");
        assert_eq!(handle.last("t1.txt"), Some("t1.txt=\".005\"".into()));
    }

    #[test]
    fn rpm_is_redrawn_only_on_change() {
        let (mut c, handle) = controller();
        c.start().unwrap();
        let status = EngineStatus { rpm: 300, ..idle() };
        c.update(status, false).unwrap();
        handle.take_received();
        c.update(status, false).unwrap();
        assert!(!handle.received().iter().any(|l| l.starts_with("t0.txt")));
    }
}
