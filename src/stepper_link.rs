/// Stepper drive over a serial step generator
///
/// The step-generator firmware speaks CmdMessenger: `<id>,<escaped binary
/// args>;`. The tick thread never touches the port; commands go through a
/// bounded channel to a writer thread, which collapses runs of absolute
/// moves to the newest one. A failed write or a dropped position
/// redefinition raises the drive alarm.

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serialport;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::drive::StepperDrive;

const CMD_MOVE_TO: u8 = 2; // amove
const CMD_SET_POSITION: u8 = 4; // set_stepper
const CMD_SHIFT_POSITION: u8 = 5;

const QUEUE_DEPTH: usize = 256;
const ESCAPE: u8 = b'/';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    MoveTo(i32),
    SetPosition(i32),
    ShiftPosition(i32),
}

impl LinkCommand {
    fn id(&self) -> u8 {
        match self {
            LinkCommand::MoveTo(_) => CMD_MOVE_TO,
            LinkCommand::SetPosition(_) => CMD_SET_POSITION,
            LinkCommand::ShiftPosition(_) => CMD_SHIFT_POSITION,
        }
    }

    fn value(&self) -> i32 {
        match *self {
            LinkCommand::MoveTo(v) | LinkCommand::SetPosition(v) | LinkCommand::ShiftPosition(v) => v,
        }
    }
}

pub fn escape_cmdmessenger_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(bytes.len() * 2);
    for &b in bytes {
        if b == b',' || b == b';' || b == ESCAPE || b == 0 {
            escaped.push(ESCAPE);
        }
        escaped.push(b);
    }
    escaped
}

/// One complete command for stepper `stepper`.
pub fn encode_command(stepper: i16, command: LinkCommand) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::with_capacity(20);
    buf.push(b'0' + command.id());
    buf.push(b',');
    buf.extend_from_slice(&escape_cmdmessenger_bytes(&stepper.to_le_bytes()));
    buf.push(b',');
    buf.extend_from_slice(&escape_cmdmessenger_bytes(&command.value().to_le_bytes()));
    buf.push(b';');
    buf
}

/// Drop every absolute move that is directly followed by another one.
pub fn coalesce(commands: Vec<LinkCommand>) -> Vec<LinkCommand> {
    let mut out: Vec<LinkCommand> = Vec::with_capacity(commands.len());
    for command in commands {
        if matches!(command, LinkCommand::MoveTo(_)) && matches!(out.last(), Some(LinkCommand::MoveTo(_))) {
            out.pop();
        }
        out.push(command);
    }
    out
}

fn raise_alarm(alarm: &AtomicBool, reason: &str) {
    if !alarm.swap(true, Ordering::SeqCst) {
        log::error!(target: "stepper_link", "drive alarm: {}", reason);
    }
}

fn writer_loop<W: Write>(mut port: W, rx: Receiver<LinkCommand>, stepper: i16, alarm: Arc<AtomicBool>) {
    while let Ok(first) = rx.recv() {
        let mut batch = vec![first];
        batch.extend(rx.try_iter());
        for command in coalesce(batch) {
            let bytes = encode_command(stepper, command);
            if let Err(e) = port.write_all(&bytes).and_then(|_| port.flush()) {
                raise_alarm(&alarm, &format!("write failed: {}", e));
            }
        }
    }
    log::debug!(target: "stepper_link", "writer finished");
}

pub struct StepperLink {
    tx: Option<Sender<LinkCommand>>,
    alarm: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
}

impl StepperLink {
    pub fn open(port_path: &str, baud: u32, stepper: i16) -> Result<Self> {
        let port = serialport::new(port_path, baud)
            .timeout(Duration::from_secs(2))
            .open()
            .map_err(|e| anyhow!("Connection to step generator on {} failed: {}", port_path, e))?;
        std::thread::sleep(Duration::from_millis(2000)); // board resets on connect
        log::info!(target: "stepper_link", "step generator on {} at {} baud", port_path, baud);
        Ok(Self::with_writer(port, stepper))
    }

    /// Drive `stepper` through any byte sink.
    pub fn with_writer<W: Write + Send + 'static>(writer: W, stepper: i16) -> Self {
        let (tx, rx) = bounded(QUEUE_DEPTH);
        let alarm = Arc::new(AtomicBool::new(false));
        let thread_alarm = Arc::clone(&alarm);
        let handle = std::thread::spawn(move || writer_loop(writer, rx, stepper, thread_alarm));
        Self {
            tx: Some(tx),
            alarm,
            writer: Some(handle),
        }
    }

    fn queue(&self, command: LinkCommand) {
        let Some(tx) = self.tx.as_ref() else { return };
        match tx.try_send(command) {
            Ok(()) => {}
            // a newer absolute move follows next tick
            Err(TrySendError::Full(LinkCommand::MoveTo(_))) => {
                log::trace!(target: "stepper_link", "queue full, move dropped");
            }
            Err(TrySendError::Full(_)) => raise_alarm(&self.alarm, "queue full, position update lost"),
            Err(TrySendError::Disconnected(_)) => raise_alarm(&self.alarm, "writer thread gone"),
        }
    }
}

impl StepperDrive for StepperLink {
    fn set_desired_position(&mut self, steps: i32) {
        self.queue(LinkCommand::MoveTo(steps));
    }

    fn set_current_position(&mut self, steps: i32) {
        self.queue(LinkCommand::SetPosition(steps));
    }

    fn increment_current_position(&mut self, delta: i32) {
        self.queue(LinkCommand::ShiftPosition(delta));
    }

    fn is_alarm(&self) -> bool {
        self.alarm.load(Ordering::Relaxed)
    }

    fn service(&mut self) {
        // steps are generated by the firmware
    }
}

impl Drop for StepperLink {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}
