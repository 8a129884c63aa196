/// In-memory panel for `--simulate` runs and tests
///
/// Interprets the instructions it receives, answers `wept`/`rept` from an
/// emulated EEPROM and lets the caller inject touches through a
/// [`PanelHandle`] while a `Panel` owns the link itself.

use anyhow::Result;
use memchr::memmem;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::nextion::commands::from_latin1;
use crate::nextion::framing::{self, TERMINATOR};
use crate::nextion::link::PanelLink;

pub const EEPROM_SIZE: usize = 1024;

#[derive(Debug)]
struct PanelState {
    eeprom: Vec<u8>,
    /// Bytes waiting to be read by the controller.
    outbox: VecDeque<u8>,
    /// Incoming bytes not yet terminated.
    inbox: Vec<u8>,
    /// Remaining transparent write: (next offset, bytes left).
    transparent: Option<(usize, usize)>,
    received: Vec<String>,
    ack_writes: bool,
    corrupt_writes: bool,
}

impl PanelState {
    fn new() -> Self {
        Self {
            eeprom: vec![0xFF; EEPROM_SIZE],
            outbox: VecDeque::new(),
            inbox: Vec::new(),
            transparent: None,
            received: Vec::new(),
            ack_writes: true,
            corrupt_writes: false,
        }
    }

    fn reply(&mut self, bytes: &[u8]) {
        self.outbox.extend(bytes.iter().copied());
    }

    fn accept(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            if let Some((offset, left)) = self.transparent {
                let n = left.min(bytes.len());
                for (i, &b) in bytes[..n].iter().enumerate() {
                    if let Some(cell) = self.eeprom.get_mut(offset + i) {
                        *cell = if self.corrupt_writes { b ^ 0x01 } else { b };
                    }
                }
                bytes = &bytes[n..];
                if left == n {
                    self.transparent = None;
                    self.reply(&framing::frame(&[0xFD]));
                } else {
                    self.transparent = Some((offset + n, left - n));
                }
                continue;
            }

            self.inbox.extend_from_slice(bytes);
            bytes = &[];
            while let Some(idx) = memmem::find(&self.inbox, &TERMINATOR) {
                let line: Vec<u8> = self.inbox.drain(..idx + TERMINATOR.len()).take(idx).collect();
                let line = from_latin1(&line);
                self.execute(&line);
                if self.transparent.is_some() {
                    // the rest of the inbox is transparent data
                    let rest = std::mem::take(&mut self.inbox);
                    self.accept(&rest);
                    break;
                }
            }
        }
    }

    fn execute(&mut self, line: &str) {
        if let Some((offset, len)) = parse_eeprom_args(line, "wept ") {
            if self.ack_writes {
                self.transparent = Some((offset, len));
                self.reply(&framing::frame(&[0xFE]));
            }
        } else if let Some((offset, len)) = parse_eeprom_args(line, "rept ") {
            let data: Vec<u8> = (offset..offset + len)
                .map(|i| self.eeprom.get(i).copied().unwrap_or(0xFF))
                .collect();
            self.reply(&data);
        }
        self.received.push(line.to_string());
    }
}

fn parse_eeprom_args(line: &str, prefix: &str) -> Option<(usize, usize)> {
    let (offset, len) = line.strip_prefix(prefix)?.split_once(',')?;
    Some((offset.trim().parse().ok()?, len.trim().parse().ok()?))
}

fn lock(state: &Mutex<PanelState>) -> MutexGuard<'_, PanelState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
pub struct SimulatedPanel {
    state: Arc<Mutex<PanelState>>,
}

/// Test/simulation side of a [`SimulatedPanel`].
#[derive(Debug, Clone)]
pub struct PanelHandle {
    state: Arc<Mutex<PanelState>>,
}

impl SimulatedPanel {
    /// Blank panel (erased EEPROM) and a handle to drive it.
    pub fn new() -> (Self, PanelHandle) {
        let state = Arc::new(Mutex::new(PanelState::new()));
        (
            Self { state: Arc::clone(&state) },
            PanelHandle { state },
        )
    }
}

impl PanelLink for SimulatedPanel {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = lock(&self.state);
        let n = buf.len().min(state.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(state.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        lock(&self.state).accept(bytes);
        Ok(())
    }
}

impl PanelHandle {
    pub fn touch(&self, code: u8) {
        lock(&self.state).reply(&[0x25, code, 0xFF, 0xFF, 0xFF]);
    }

    /// Announce a (re)boot.
    pub fn ready(&self) {
        lock(&self.state).reply(&framing::frame(&[0x88]));
    }

    /// Raw bytes straight onto the wire.
    pub fn inject(&self, bytes: &[u8]) {
        lock(&self.state).reply(bytes);
    }

    pub fn eeprom(&self, offset: usize, len: usize) -> Vec<u8> {
        let state = lock(&self.state);
        let end = (offset + len).min(state.eeprom.len());
        state.eeprom[offset.min(end)..end].to_vec()
    }

    pub fn write_eeprom(&self, offset: usize, bytes: &[u8]) {
        let mut state = lock(&self.state);
        let start = offset.min(state.eeprom.len());
        let end = (offset + bytes.len()).min(state.eeprom.len());
        state.eeprom[start..end].copy_from_slice(&bytes[..end - start]);
    }

    /// Ignore `wept` entirely (no acknowledgment).
    pub fn set_ack_writes(&self, ack: bool) {
        lock(&self.state).ack_writes = ack;
    }

    /// Acknowledge writes but store flipped bits.
    pub fn set_corrupt_writes(&self, corrupt: bool) {
        lock(&self.state).corrupt_writes = corrupt;
    }

    /// Every instruction received so far.
    pub fn received(&self) -> Vec<String> {
        lock(&self.state).received.clone()
    }

    pub fn take_received(&self) -> Vec<String> {
        std::mem::take(&mut lock(&self.state).received)
    }

    /// Most recent instruction starting with `prefix`.
    pub fn last(&self, prefix: &str) -> Option<String> {
        lock(&self.state)
            .received
            .iter()
            .rev()
            .find(|line| line.starts_with(prefix))
            .cloned()
    }
}
