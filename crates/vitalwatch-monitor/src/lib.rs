//! The vitals pipeline: frame → dual extraction → fusion → storage →
//! evaluation → alert store, broadcaster and notifier.

mod config;
mod error;
mod frames;
mod monitor;

pub use config::MonitorConfig;
pub use error::MonitorError;
pub use frames::{FileFrameSource, FrameSource};
pub use monitor::{CycleOutcome, Monitor};
