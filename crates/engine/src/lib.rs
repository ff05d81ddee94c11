//! Real-time call engine
//!
//! Bridges a telephony media stream and a realtime AI voice session for
//! one call: fixed-rate frame pacing toward the wire, caller speech
//! detection, barge-in cancellation, turn lifecycle tracking, goodbye
//! driven hangup, and a silence watchdog.

pub mod barge_in;
pub mod clock;
pub mod engine;
pub mod framer;
pub mod hangup;
pub mod playback;
pub mod session;
pub mod turns;
pub mod vad;
pub mod watchdog;

pub use barge_in::{BargeInController, BargeInOutcome};
pub use clock::ClockedSender;
pub use engine::CallEngine;
pub use framer::Framer;
pub use hangup::HangupExecutor;
pub use playback::PlaybackQueue;
pub use session::{CallSession, HangupGate};
pub use turns::TurnLifecycle;
pub use vad::{VadSignal, VadState, VoiceActivityMonitor};
pub use watchdog::SilenceWatchdog;

use thiserror::Error;

/// Engine-level failures. Per-frame transport errors are logged and
/// absorbed; these are the ones that end a call.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("core error: {0}")]
    Core(#[from] call_bridge_core::Error),

    #[error("engine task failed: {0}")]
    Task(String),
}
