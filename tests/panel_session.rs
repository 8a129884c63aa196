//! Operator sessions against a simulated panel: touches in, display
//! instructions and EEPROM traffic out, selections into the engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use leadscrew::controller::{ControllerSettings, PanelController};
use leadscrew::decimal::parse_decimal;
use leadscrew::drive::{NoLimitSwitch, SimulatedSpindle, SimulatedStepper};
use leadscrew::engine::SyncEngine;
use leadscrew::handoff::EngineStatus;
use leadscrew::nextion::{Panel, PanelHandle, SimulatedPanel};
use leadscrew::params::{decode_slot, encode_slot, ParamSlot, ParameterSet, ParameterStore, SLOT_LEN};
use leadscrew::runtime;
use leadscrew::tables::{Leadscrew, MachineGeometry, RatioTableCatalog};

const ENTER: u8 = 0x0D;
const MODE: u8 = 0x1A;
const START_STOP: u8 = 0x1C;
const CANCEL: u8 = 0x1E;

fn geometry() -> MachineGeometry {
    MachineGeometry {
        encoder_resolution: 4096,
        stepper_resolution: 200,
        microsteps: 8,
        leadscrew: Leadscrew::Tpi(12),
    }
}

fn controller() -> (PanelController<SimulatedPanel>, PanelHandle) {
    let catalog = RatioTableCatalog::standard(&geometry()).unwrap();
    let store = ParameterStore::new(ParameterSet::factory(&catalog), 0, Duration::from_millis(20));
    let (sim, handle) = SimulatedPanel::new();
    let settings = ControllerSettings {
        encoder_resolution: 4096,
        ready_timeout: Duration::from_millis(5),
        credits: "ELS test bench".into(),
    };
    let c = PanelController::new(Panel::new(sim), store, catalog, geometry(), settings);
    (c, handle)
}

fn press(handle: &PanelHandle, keys: &[u8]) {
    for &key in keys {
        handle.touch(key);
    }
}

fn idle() -> EngineStatus {
    EngineStatus::default()
}

fn turning(rpm: u16) -> EngineStatus {
    EngineStatus { rpm, ..idle() }
}

#[test]
fn typed_thread_pitch_is_committed_and_drives_engine() {
    let (mut c, handle) = controller();
    c.start().unwrap();

    press(&handle, &[MODE, b'1', b'.', b'5', ENTER]);
    let selection = c.update(idle(), false).unwrap().expect("gearing changed");

    assert_eq!(c.state().slot(), ParamSlot::ImperialThread);
    assert_eq!(c.params().get(ParamSlot::ImperialThread).text(), "1.5");
    assert_eq!(decode_slot(&handle.eeprom(SLOT_LEN, SLOT_LEN)), "1.5");
    assert_eq!(handle.last("t1.txt"), Some("t1.txt=\"1.5\"".into()));

    let expected = geometry()
        .ratio_for(ParamSlot::ImperialThread.kind(), parse_decimal("1.5").unwrap())
        .unwrap();
    assert_eq!(selection.ratio, Some(expected));
    assert!(!selection.reverse);

    let mut engine = SyncEngine::new(SimulatedSpindle::new(4096, 4096, 0), SimulatedStepper::new());
    engine.apply(selection);
    engine.set_enabled(true);
    engine.tick(2048);
    assert_eq!(engine.drive().desired as u128, expected.scale(2048));
}

#[test]
fn turning_spindle_blocks_gearing_keys_only() {
    let (mut c, handle) = controller();
    c.start().unwrap();

    press(&handle, &[MODE, START_STOP, b'7']);
    assert_eq!(c.update(turning(450), false).unwrap(), None);

    assert!(c.state().feed_mode);
    assert!(!c.is_enabled());
    assert!(c.state().in_edit);
    assert_eq!(c.state().edit_buffer, "7");
    assert_eq!(handle.last("t0.txt"), Some("t0.txt=\"450\"".into()));
}

#[test]
fn alarm_disables_and_ignores_touches() {
    let (mut c, handle) = controller();
    c.start().unwrap();
    press(&handle, &[START_STOP]);
    assert!(c.update(idle(), false).unwrap().unwrap().enabled);

    press(&handle, &[b'5', START_STOP]);
    let alarm = EngineStatus { alarm: true, ..idle() };
    let selection = c.update(alarm, false).unwrap().expect("forced disable");
    assert!(!selection.enabled);
    assert!(!c.state().in_edit);
    assert!(c.state().edit_buffer.is_empty());
    assert_eq!(handle.last("p2.pic"), Some("p2.pic=10".into()));
}

#[test]
fn corrupt_eeprom_is_replaced_with_factory_values() {
    let (mut c, handle) = controller();
    handle.write_eeprom(0, &encode_slot("abc").unwrap());
    handle.write_eeprom(2 * SLOT_LEN, &encode_slot("0").unwrap());
    c.start().unwrap();

    let catalog = RatioTableCatalog::standard(&geometry()).unwrap();
    assert_eq!(c.params(), &ParameterSet::factory(&catalog));
    assert_eq!(decode_slot(&handle.eeprom(0, SLOT_LEN)), ".005");
    assert_eq!(decode_slot(&handle.eeprom(2 * SLOT_LEN, SLOT_LEN)), ".12");
    assert_eq!(handle.last("t1.txt"), Some("t1.txt=\".005\"".into()));
}

#[test]
fn committed_value_survives_restart() {
    let (mut first, first_handle) = controller();
    first.start().unwrap();
    press(&first_handle, &[MODE, b'2', b'0', ENTER]);
    first.update(idle(), false).unwrap();

    let (mut second, second_handle) = controller();
    second_handle.write_eeprom(0, &first_handle.eeprom(0, 4 * SLOT_LEN));
    second.start().unwrap();
    assert_eq!(second.params().get(ParamSlot::ImperialThread).text(), "20");
    // valid set, nothing rewritten
    assert!(!second_handle.received().iter().any(|l| l.starts_with("wept")));

    press(&second_handle, &[MODE]);
    second.update(idle(), false).unwrap();
    assert_eq!(second_handle.last("t1.txt"), Some("t1.txt=\"20\"".into()));
    assert_eq!(
        second.catalog().lookup(false, true).current().label,
        "20"
    );
}

#[test]
fn panel_reboot_triggers_full_redraw() {
    let (mut c, handle) = controller();
    handle.ready();
    c.start().unwrap();
    c.update(idle(), false).unwrap();
    handle.take_received();

    handle.ready();
    c.update(idle(), false).unwrap();
    let received = handle.received();
    assert!(received.contains(&"t2.txt=\"ELS test bench\"".to_string()));
    assert!(received.contains(&"t1.txt=\".005\"".to_string()));
    // live fields are resent after a redraw
    assert!(received.iter().any(|l| l.starts_with("t0.txt")));
}

#[test]
fn cancel_restores_committed_value() {
    let (mut c, handle) = controller();
    c.start().unwrap();
    press(&handle, &[b'9', b'9']);
    c.update(idle(), false).unwrap();
    assert_eq!(handle.last("t1.txt"), Some("t1.txt=\"99\"".into()));

    press(&handle, &[CANCEL]);
    assert_eq!(c.update(idle(), false).unwrap(), None);
    assert!(!c.state().in_edit);
    assert_eq!(handle.last("t1.txt"), Some("t1.txt=\".005\"".into()));
    assert_eq!(c.params().get(ParamSlot::ImperialFeed).text(), ".005");
}

#[test]
fn runtime_hands_selection_to_tick_thread() {
    let (mut c, handle) = controller();
    handle.touch(START_STOP);

    let running = Arc::new(AtomicBool::new(true));
    let stopper = {
        let running = Arc::clone(&running);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            running.store(false, Ordering::SeqCst);
        })
    };
    let engine = runtime::run(
        SyncEngine::new(SimulatedSpindle::new(4096, 4096, 0), SimulatedStepper::new()),
        &mut c,
        &NoLimitSwitch,
        Duration::from_micros(500),
        Duration::from_millis(5),
        Arc::clone(&running),
    )
    .unwrap();
    stopper.join().unwrap();

    assert!(c.is_enabled());
    assert!(engine.is_enabled());
    assert_eq!(engine.ratio(), c.active_ratio());
}
