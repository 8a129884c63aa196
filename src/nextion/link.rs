/// Panel session over a byte link
///
/// [`Panel`] owns the reassembly buffer and a queue of messages that arrived
/// while it was waiting for something else, so an acknowledgment wait never
/// swallows a touch.

use anyhow::{anyhow, Result};
use serialport;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use crate::nextion::commands::{latin1, DisplayCommand};
use crate::nextion::framing::{self, classify, FrameBuffer, PanelMessage};

/// Raw byte transport to the panel. Reads never block.
pub trait PanelLink {
    /// Copy whatever has arrived into `buf`; Ok(0) when nothing is pending.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;
}

pub struct SerialPanelLink {
    port: Box<dyn serialport::SerialPort>,
    port_path: String,
}

impl SerialPanelLink {
    pub fn open(port_path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(port_path, baud)
            .timeout(Duration::from_millis(5))
            .open()
            .map_err(|e| anyhow!("Failed to open panel port {}: {}", port_path, e))?;
        log::info!(target: "nextion", "opened panel on {} at {} baud", port_path, baud);
        Ok(Self {
            port,
            port_path: port_path.to_string(),
        })
    }
}

impl PanelLink for SerialPanelLink {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let waiting = self.port.bytes_to_read()? as usize;
        if waiting == 0 {
            return Ok(0);
        }
        let n = waiting.min(buf.len());
        match self.port.read(&mut buf[..n]) {
            Ok(read) => Ok(read),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(anyhow!("Read error on {}: {}", self.port_path, e)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct Panel<L> {
    link: L,
    frames: FrameBuffer,
    deferred: VecDeque<PanelMessage>,
}

impl<L: PanelLink> Panel<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            frames: FrameBuffer::new(),
            deferred: VecDeque::new(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Move every pending byte from the link into the frame buffer.
    fn pump(&mut self) -> Result<()> {
        let mut chunk = [0u8; 64];
        loop {
            let n = self.link.read_available(&mut chunk)?;
            if n == 0 {
                return Ok(());
            }
            log::trace!(target: "nextion", "rx {}", hex(&chunk[..n]));
            self.frames.push(&chunk[..n]);
        }
    }

    fn collect(&mut self) -> Result<()> {
        self.pump()?;
        for frame in self.frames.drain() {
            match classify(&frame) {
                Some(msg) => self.deferred.push_back(msg),
                None => log::trace!(target: "nextion", "discarded frame {}", hex(&frame)),
            }
        }
        Ok(())
    }

    /// Every complete message received so far, oldest first.
    pub fn poll(&mut self) -> Result<Vec<PanelMessage>> {
        self.collect()?;
        Ok(self.deferred.drain(..).collect())
    }

    pub fn send(&mut self, command: &DisplayCommand) -> Result<()> {
        log::trace!(target: "nextion", "tx {:?}", command);
        self.link.write_all(&command.encode())
    }

    pub fn send_text(&mut self, line: &str) -> Result<()> {
        log::trace!(target: "nextion", "tx {}", line);
        self.link.write_all(&framing::frame(&latin1(line)))
    }

    /// Unframed bytes, for transparent data after a write acknowledgment.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        log::trace!(target: "nextion", "tx raw {}", hex(bytes));
        self.link.write_all(bytes)
    }

    /// Wait for one particular message. Anything else that arrives in the
    /// meantime stays queued for the next poll. Ok(false) on timeout.
    pub fn wait_for(&mut self, wanted: PanelMessage, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.collect()?;
            if let Some(pos) = self.deferred.iter().position(|m| *m == wanted) {
                self.deferred.remove(pos);
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn wait_ready(&mut self, timeout: Duration) -> Result<bool> {
        self.wait_for(PanelMessage::Ready, timeout)
    }

    /// Two-phase EEPROM write. Ok(false) if either acknowledgment is missing.
    pub fn write_eeprom(&mut self, offset: u32, data: &[u8], timeout: Duration) -> Result<bool> {
        self.send(&DisplayCommand::EepromWrite { offset, len: data.len() })?;
        if !self.wait_for(PanelMessage::TransparentReady, timeout)? {
            log::debug!(target: "nextion", "no transparent-ready ack for write at {}", offset);
            return Ok(false);
        }
        self.send_raw(data)?;
        if !self.wait_for(PanelMessage::TransparentDone, timeout)? {
            log::debug!(target: "nextion", "no transparent-done ack for write at {}", offset);
            return Ok(false);
        }
        Ok(true)
    }

    /// Read `len` raw bytes of panel EEPROM. None on timeout.
    pub fn read_eeprom(&mut self, offset: u32, len: usize, timeout: Duration) -> Result<Option<Vec<u8>>> {
        // complete messages stay queued, partial ones would corrupt the reply
        self.collect()?;
        let stale = self.frames.clear();
        if stale > 0 {
            log::trace!(target: "nextion", "dropped {} partial bytes before read", stale);
        }

        self.send(&DisplayCommand::EepromRead { offset, len })?;
        let deadline = Instant::now() + timeout;
        loop {
            self.pump()?;
            if self.frames.pending() >= len {
                return Ok(Some(self.frames.take_raw(len)));
            }
            if Instant::now() >= deadline {
                log::debug!(
                    target: "nextion",
                    "read at {} timed out with {} of {} bytes",
                    offset, self.frames.pending(), len
                );
                self.frames.clear();
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
