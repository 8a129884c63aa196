/// Message framing for the panel's serial stream
///
/// Every message in either direction ends with `FF FF FF`. Incoming bytes
/// arrive in arbitrary chunks; [`FrameBuffer`] holds them until a terminator
/// completes a message.

use memchr::memmem;

pub const TERMINATOR: [u8; 3] = [0xFF, 0xFF, 0xFF];

/// Unterminated bytes kept before the oldest are dropped as line noise.
const MAX_BUFFERED: usize = 256;

const READY: u8 = 0x88;
const TOUCH: u8 = 0x25;
const TRANSPARENT_READY: u8 = 0xFE;
const TRANSPARENT_DONE: u8 = 0xFD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelMessage {
    /// Panel finished booting (or rebooted).
    Ready,
    /// Touch event with its key code.
    Touch(u8),
    /// Panel is ready to receive transparent (EEPROM) data.
    TransparentReady,
    /// Panel stored all transparent data.
    TransparentDone,
}

/// Classify one complete, terminator-included message. Anything not
/// recognised is None.
pub fn classify(frame: &[u8]) -> Option<PanelMessage> {
    let n = frame.len();
    if n < 4 || frame[n - 3..] != TERMINATOR {
        return None;
    }
    match (n, frame[0], frame[n - 4]) {
        (4, _, READY) | (10, _, READY) => Some(PanelMessage::Ready),
        (5, TOUCH, _) => Some(PanelMessage::Touch(frame[1])),
        (4, _, TRANSPARENT_READY) => Some(PanelMessage::TransparentReady),
        (4, _, TRANSPARENT_DONE) => Some(PanelMessage::TransparentDone),
        _ => None,
    }
}

/// Append the terminator to an outgoing payload.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + TERMINATOR.len());
    out.extend_from_slice(payload);
    out.extend_from_slice(&TERMINATOR);
    out
}

#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_BUFFERED && memmem::find(&self.buf, &TERMINATOR).is_none() {
            // keep a possible partial terminator
            let keep = self.buf.len().min(TERMINATOR.len() - 1);
            let dropped = self.buf.len() - keep;
            self.buf.drain(..dropped);
            log::trace!(target: "nextion", "dropped {} unterminated bytes", dropped);
        }
    }

    /// Split off every complete message, oldest first.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(idx) = memmem::find(&self.buf, &TERMINATOR) {
            let end = idx + TERMINATOR.len();
            frames.push(self.buf.drain(..end).collect());
        }
        frames
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Remove up to `n` raw bytes from the front, ignoring framing.
    pub fn take_raw(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.buf.len());
        self.buf.drain(..n).collect()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.buf.len();
        self.buf.clear();
        n
    }
}
