/// Panel instructions
///
/// Each [`DisplayCommand`] expands to one or more instruction lines. The
/// panel's fonts are single-byte, so text is sent as Latin-1.

use crate::nextion::framing;

const COLOR_NORMAL: u32 = 65535;
const COLOR_EDITING: u32 = 13812;

/// Number of position readout formats, cycled by the position key.
pub const POSITION_MODES: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedColor {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Picture {
    /// Carriage motion diagram.
    Diagram { thread: bool, reverse: bool },
    /// Units legend next to the feed value.
    Units { metric: bool, thread: bool },
    /// Start/stop icon.
    Enabled(bool),
}

impl Picture {
    fn object(&self) -> &'static str {
        match self {
            Picture::Diagram { .. } => "p0",
            Picture::Units { .. } => "p1",
            Picture::Enabled(_) => "p2",
        }
    }

    fn id(&self) -> u8 {
        match *self {
            Picture::Diagram { thread: false, reverse: false } => 4,
            Picture::Diagram { thread: true, reverse: false } => 5,
            Picture::Diagram { thread: true, reverse: true } => 3,
            Picture::Diagram { thread: false, reverse: true } => 2,
            Picture::Units { metric: true, thread: false } => 8,
            Picture::Units { metric: true, thread: true } => 7,
            Picture::Units { metric: false, thread: false } => 6,
            Picture::Units { metric: false, thread: true } => 9,
            Picture::Enabled(true) => 11,
            Picture::Enabled(false) => 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayCommand {
    FeedText(String),
    FeedColor(FeedColor),
    Rpm(u16),
    Position(String),
    Picture(Picture),
    Alarm(bool),
    Credits(String),
    EepromWrite { offset: u32, len: usize },
    EepromRead { offset: u32, len: usize },
}

impl DisplayCommand {
    /// Instruction lines, without terminators.
    pub fn lines(&self) -> Vec<String> {
        match self {
            DisplayCommand::FeedText(text) => vec![set_text("t1", text)],
            DisplayCommand::FeedColor(color) => {
                let value = match color {
                    FeedColor::Normal => COLOR_NORMAL,
                    FeedColor::Editing => COLOR_EDITING,
                };
                vec![format!("t1.pco={}", value)]
            }
            DisplayCommand::Rpm(rpm) => vec![set_text("t0", &rpm.to_string())],
            DisplayCommand::Position(text) => vec![set_text("t3", text)],
            DisplayCommand::Picture(pic) => vec![format!("{}.pic={}", pic.object(), pic.id())],
            DisplayCommand::Alarm(true) => vec![
                "vis 4,0".to_string(),
                "vis 25,1".to_string(),
                "r1.val=1".to_string(),
            ],
            DisplayCommand::Alarm(false) => vec!["vis 25,0".to_string(), "r1.val=0".to_string()],
            DisplayCommand::Credits(text) => vec![set_text("t2", text)],
            DisplayCommand::EepromWrite { offset, len } => vec![format!("wept {},{}", offset, len)],
            DisplayCommand::EepromRead { offset, len } => vec![format!("rept {},{}", offset, len)],
        }
    }

    /// Wire bytes, each line terminated.
    pub fn encode(&self) -> Vec<u8> {
        self.lines()
            .iter()
            .flat_map(|line| framing::frame(&latin1(line)))
            .collect()
    }
}

fn set_text(object: &str, text: &str) -> String {
    // the panel has no escape for quotes inside a string literal
    format!("{}.txt=\"{}\"", object, text.replace('"', "'"))
}

/// Latin-1 encoding; characters outside it become '?'.
pub fn latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

pub fn from_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Spindle position as shown in the position field.
pub fn format_position(count: u32, resolution: u32, mode: u8) -> String {
    let resolution = resolution.max(1);
    let within = count % resolution;
    match mode {
        0 => count.to_string(),
        1 => within.to_string(),
        2 => format!("{:.1}", within as f64 * 100.0 / resolution as f64),
        3 => format!("{:.2}", within as f64 * 360.0 / resolution as f64),
        4 => {
            let minutes = within as u64 * 360 * 60 / resolution as u64;
            format!("{}\u{b0}{:02}'", minutes / 60, minutes % 60)
        }
        _ => String::new(),
    }
}
