/// Serial display panel: framing, instructions, session and simulation

pub mod commands;
pub mod framing;
pub mod link;
pub mod sim;

pub use commands::{format_position, DisplayCommand, FeedColor, Picture, POSITION_MODES};
pub use framing::{FrameBuffer, PanelMessage};
pub use link::{Panel, PanelLink, SerialPanelLink};
pub use sim::{PanelHandle, SimulatedPanel};
