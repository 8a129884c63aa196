/// The two concurrent activities
///
/// A tick thread owns the engine and runs it at a fixed period; the polling
/// loop runs the panel controller on the caller's thread. They share only
/// the selection cell, the status board and the running flag.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::controller::PanelController;
use crate::drive::{Encoder, LimitSwitch, StepperDrive};
use crate::engine::SyncEngine;
use crate::handoff::{EngineStatus, SelectionCell, StatusBoard};
use crate::nextion::link::PanelLink;

/// Start the tick thread. It returns the engine when `running` clears.
pub fn spawn_tick<E, D>(
    mut engine: SyncEngine<E, D>,
    cell: Arc<SelectionCell>,
    board: Arc<StatusBoard>,
    period: Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<SyncEngine<E, D>>
where
    E: Encoder + Send + 'static,
    D: StepperDrive + Send + 'static,
{
    std::thread::spawn(move || {
        let mut next = Instant::now();
        let mut overruns: u64 = 0;
        while running.load(Ordering::SeqCst) {
            if let Some(selection) = cell.take() {
                engine.apply(selection);
            }
            engine.service();
            board.publish(EngineStatus {
                rpm: engine.rpm(),
                position: engine.position(),
                alarm: engine.is_alarm(),
                enabled: engine.is_enabled(),
            });

            next += period;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                overruns += 1;
                log::trace!(target: "engine", "tick overrun #{}", overruns);
                next = now;
            }
        }
        log::info!(target: "engine", "tick stopped ({} overruns)", overruns);
        engine
    })
}

/// Poll the panel until `running` clears. Errors from a single cycle are
/// logged and the loop carries on.
pub fn run_panel_loop<L, S>(
    controller: &mut PanelController<L>,
    limit: &S,
    cell: &SelectionCell,
    board: &StatusBoard,
    period: Duration,
    running: &AtomicBool,
) -> Result<()>
where
    L: PanelLink,
    S: LimitSwitch + ?Sized,
{
    cell.publish(controller.start()?);
    while running.load(Ordering::SeqCst) {
        match controller.update(board.snapshot(), limit.is_tripped()) {
            Ok(Some(selection)) => {
                log::debug!(target: "controller", "new selection {:?}", selection);
                cell.publish(selection);
            }
            Ok(None) => {}
            Err(e) => log::error!(target: "controller", "panel cycle failed: {:#}", e),
        }
        std::thread::sleep(period);
    }
    Ok(())
}

/// Run both activities until `running` clears, then join the tick.
pub fn run<E, D, L, S>(
    engine: SyncEngine<E, D>,
    controller: &mut PanelController<L>,
    limit: &S,
    tick_period: Duration,
    poll_period: Duration,
    running: Arc<AtomicBool>,
) -> Result<SyncEngine<E, D>>
where
    E: Encoder + Send + 'static,
    D: StepperDrive + Send + 'static,
    L: PanelLink,
    S: LimitSwitch + ?Sized,
{
    let cell = Arc::new(SelectionCell::new());
    let board = Arc::new(StatusBoard::new());
    let tick = spawn_tick(
        engine,
        Arc::clone(&cell),
        Arc::clone(&board),
        tick_period,
        Arc::clone(&running),
    );

    let result = run_panel_loop(controller, limit, &cell, &board, poll_period, &running);
    running.store(false, Ordering::SeqCst);
    let engine = tick
        .join()
        .map_err(|_| anyhow::anyhow!("tick thread panicked"))?;
    result.map(|_| engine)
}
