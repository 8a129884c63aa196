/// Electronic Leadscrew Library
///
/// Spindle-synchronised leadscrew control: the synchronization engine, the
/// operator panel protocol and the controller that joins them.

pub mod config_loader;
pub mod controller;
pub mod decimal;
pub mod drive;
pub mod engine;
pub mod gpio;
pub mod handoff;
pub mod input;
pub mod nextion;
pub mod params;
pub mod runtime;
pub mod stepper_link;
pub mod tables;
