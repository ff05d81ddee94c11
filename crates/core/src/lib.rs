//! Core types for the call bridge engine
//!
//! This crate provides the foundational types used across the workspace:
//! - Audio frame types and RMS energy helpers
//! - Turn and hangup state model
//! - Boundary event types (telephony, AI channel, observability)
//! - Abstract duplex channel traits for the two external legs
//! - Error types

pub mod audio;
pub mod channels;
pub mod error;
pub mod events;
pub mod turn;

pub use audio::{rms_energy_db, AudioFrame, FrameFormat, SILENCE_DB};
pub use channels::{AiRealtimeChannel, TelephonyLink};
pub use error::{Error, Result};
pub use events::{
    AiEvent, EngineEvent, HangupSkipReason, HangupTrigger, TelephonyEvent,
};
pub use turn::{CallDirection, HangupState, Turn, TurnStatus};
