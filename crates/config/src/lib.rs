//! Configuration for the call bridge
//!
//! Layered loading: TOML file, then `CALL_BRIDGE__*` environment
//! overrides. All engine thresholds are configuration, not constants.

pub mod settings;

pub use settings::{
    AudioSettings, BargeInSettings, HangupSettings, PlaybackSettings, ServerSettings, Settings,
    VadSettings, WatchdogSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
