//! Electronic leadscrew: keeps the leadscrew stepper geared to the spindle
//! and runs the operator panel.

use anyhow::Result;
use clap::Parser;
use gethostname::gethostname;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use leadscrew::config_loader::{self, LeadscrewSettings};
use leadscrew::controller::PanelController;
use leadscrew::drive::{LimitSwitch, NoLimitSwitch, SimulatedSpindle, SimulatedStepper, StepperDrive};
use leadscrew::engine::SyncEngine;
use leadscrew::gpio::GpioLimitSwitch;
use leadscrew::nextion::{Panel, PanelLink, SerialPanelLink, SimulatedPanel};
use leadscrew::params::{ParameterSet, ParameterStore};
use leadscrew::runtime;
use leadscrew::stepper_link::StepperLink;
use leadscrew::tables::RatioTableCatalog;

/// Electronic leadscrew controller (strict config; fails loudly on missing keys)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to leadscrew.yaml next to Cargo.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Host entry to use instead of this machine's hostname
    #[arg(long)]
    host: Option<String>,
    /// Simulated panel, spindle and stepper
    #[arg(long, default_value_t = false)]
    simulate: bool,
    /// Simulated spindle speed
    #[arg(long, default_value_t = 0)]
    spindle_rpm: u16,
    /// Debug logging
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn limit_switch(settings: &LeadscrewSettings) -> Result<Box<dyn LimitSwitch>> {
    match settings.limit_switch_pin {
        Some(pin) => Ok(Box::new(GpioLimitSwitch::open(&settings.gpio_chip, pin)?)),
        None => Ok(Box::new(NoLimitSwitch)),
    }
}

fn drive_machine<L, D>(
    settings: &LeadscrewSettings,
    link: L,
    drive: D,
    limit: &dyn LimitSwitch,
    spindle_rpm: u16,
    running: Arc<AtomicBool>,
) -> Result<()>
where
    L: PanelLink,
    D: StepperDrive + Send + 'static,
{
    let geometry = settings.geometry();
    let catalog = RatioTableCatalog::standard(&geometry)?;
    let store = ParameterStore::new(
        ParameterSet::factory(&catalog),
        settings.eeprom_base_offset,
        settings.eeprom_ack_timeout,
    );
    let mut controller = PanelController::new(
        Panel::new(link),
        store,
        catalog,
        geometry,
        settings.controller_settings(),
    );
    let spindle = SimulatedSpindle::new(geometry.encoder_resolution, settings.encoder_max_count, spindle_rpm);
    let engine = SyncEngine::new(spindle, drive);

    runtime::run(
        engine,
        &mut controller,
        limit,
        settings.tick_period,
        settings.poll_period,
        running,
    )?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let hostname = args
        .host
        .clone()
        .unwrap_or_else(|| gethostname().to_string_lossy().to_string());
    let path = args.config.clone().unwrap_or_else(config_loader::default_config_path);
    let settings = config_loader::load_leadscrew_settings(&path, &hostname)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let r = running.clone();
        ctrlc::set_handler(move || { r.store(false, Ordering::SeqCst); }).ok();
    }

    if args.simulate {
        log::info!(target: "leadscrew", "simulating panel, spindle at {} rpm and stepper", args.spindle_rpm);
        let (panel, handle) = SimulatedPanel::new();
        handle.ready();
        return drive_machine(
            &settings,
            panel,
            SimulatedStepper::new(),
            &NoLimitSwitch,
            args.spindle_rpm,
            running,
        );
    }

    let port = settings
        .panel_port
        .clone()
        .ok_or_else(|| anyhow::anyhow!("PANEL_PORT missing for '{}' in leadscrew.yaml", hostname))?;
    let link = SerialPanelLink::open(&port, settings.panel_baud)?;
    let limit = limit_switch(&settings)?;

    match settings.stepper_port.clone() {
        Some(stepper_port) => {
            let drive = StepperLink::open(&stepper_port, settings.stepper_baud, 0)?;
            drive_machine(&settings, link, drive, limit.as_ref(), args.spindle_rpm, running)
        }
        None => {
            log::warn!(target: "leadscrew", "no STEPPER_PORT configured, stepper is simulated");
            drive_machine(&settings, link, SimulatedStepper::new(), limit.as_ref(), args.spindle_rpm, running)
        }
    }
}
