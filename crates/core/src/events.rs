//! Event types crossing the engine's boundaries
//!
//! Two independent inbound streams feed one call: the telephony leg and
//! the AI realtime channel. Neither guarantees ordering relative to the
//! other; within the AI channel, lifecycle events and transcripts are
//! separate streams as well. The engine additionally broadcasts
//! [`EngineEvent`]s for observability — one event per state transition,
//! tagged with call/turn identity.

use crate::audio::AudioFrame;
use serde::{Deserialize, Serialize};

/// Inbound events from the telephony media stream
#[derive(Debug, Clone)]
pub enum TelephonyEvent {
    /// Media stream established
    Connected,
    /// One fixed-duration caller audio frame
    Media(AudioFrame),
    /// Media stream torn down (remote hangup or transport error)
    Disconnected,
}

/// Inbound events from the AI realtime channel
///
/// No cross-type ordering guarantee: `TranscriptFinal` may arrive before
/// or after `AudioDone` for the same turn.
#[derive(Debug, Clone)]
pub enum AiEvent {
    /// A new response turn began
    TurnStarted { turn_id: String },
    /// Raw response audio bytes (variable size, not yet framed)
    AudioChunk { turn_id: String, bytes: Vec<u8> },
    /// All audio for the turn has been emitted
    AudioDone { turn_id: String },
    /// Final transcript of the AI's own speech for the turn
    TranscriptFinal { turn_id: String, text: String },
    /// Vendor acknowledged our cancel
    TurnCancelled { turn_id: String },
    /// Turn fully finalized
    TurnCompleted { turn_id: String },
}

impl AiEvent {
    /// The turn this event belongs to
    pub fn turn_id(&self) -> &str {
        match self {
            AiEvent::TurnStarted { turn_id }
            | AiEvent::AudioChunk { turn_id, .. }
            | AiEvent::AudioDone { turn_id }
            | AiEvent::TranscriptFinal { turn_id, .. }
            | AiEvent::TurnCancelled { turn_id }
            | AiEvent::TurnCompleted { turn_id } => turn_id,
        }
    }
}

/// Which path asked for the hangup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangupTrigger {
    /// Normal path: audio finished and queues drained
    AudioDone,
    /// Goodbye transcript arrived after audio-done was already recorded
    TranscriptRace,
    /// Playback drain exceeded its bounded timeout
    DrainTimeout,
    /// Watchdog: hard silence from both parties
    SilenceTimeout,
    /// Watchdog: caller never spoke after the greeting (voicemail)
    IdleAfterGreeting,
    /// Watchdog: check-in warnings exhausted
    WarningsExhausted,
    /// Watchdog: absolute call duration cap
    MaxDuration,
}

impl HangupTrigger {
    /// Watchdog triggers terminate unconditionally; goodbye triggers must
    /// satisfy the turn-finalization preconditions first.
    pub fn is_watchdog(&self) -> bool {
        matches!(
            self,
            HangupTrigger::SilenceTimeout
                | HangupTrigger::IdleAfterGreeting
                | HangupTrigger::WarningsExhausted
                | HangupTrigger::MaxDuration
        )
    }
}

/// Why a hangup attempt was a no-op
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangupSkipReason {
    /// No goodbye was requested for this turn
    NotRequested,
    /// Request was for a different turn than the one finalizing
    TurnMismatch,
    /// The caller interrupted this turn; never hang up on it
    TurnCancelled,
    /// Vendor has not reported audio completion yet
    AudioNotDone,
    /// Farewell audio still buffered downstream
    QueueNotDrained,
    /// A hangup already executed
    AlreadyExecuted,
}

/// Observability events broadcast per call
///
/// Consumed by logging/metrics subscribers and by out-of-scope glue
/// (e.g. the check-in prompt layer). Dropping a subscriber never affects
/// the call.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TurnStarted {
        turn_id: String,
    },
    TurnCancelled {
        turn_id: String,
    },
    TurnCompleted {
        turn_id: String,
    },
    /// Caller speech crossed the candidate threshold while the AI spoke
    BargeInCandidate {
        turn_id: String,
        speech_run_ms: u64,
    },
    /// Transcript-stage confirmation (or veto) of a candidate
    BargeInConfirmed {
        turn_id: String,
    },
    /// Goodbye detected; hangup now pending for this turn
    HangupRequested {
        turn_id: String,
        trigger: HangupTrigger,
    },
    HangupExecuted {
        trigger: HangupTrigger,
        turn_id: Option<String>,
    },
    HangupSkipped {
        trigger: HangupTrigger,
        reason: HangupSkipReason,
    },
    /// Watchdog asks the out-of-scope prompt layer to nudge the caller
    CheckinRequested {
        warning_count: u32,
    },
    /// Playback queue hit capacity; producer is being backpressured
    QueueSaturated {
        depth: usize,
        capacity: usize,
    },
    CallConnected,
    CallDisconnected,
}
