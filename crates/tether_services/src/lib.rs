//! Tether Services Layer
//!
//! Process-level setup shared by binaries: settings files and logging.

pub mod logging;
pub mod settings;

pub use settings::{LoggingSettings, Settings, SettingsError};
