//! Turn and hangup state types
//!
//! A turn is one complete AI response cycle, from `turn_started` to audio
//! completion or cancellation. The AI reports turn progress on two
//! independent streams (lifecycle events and transcripts) with no
//! cross-stream ordering guarantee, so every status transition here must
//! be idempotent and order-independent.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Call direction, fixed for the session lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    #[default]
    Inbound,
    Outbound,
}

/// Status of one AI turn
///
/// `CancelRequested -> Cancelled` and `AudioDone` can race: a cancel may
/// land after the vendor already finished the audio, and audio-done may
/// arrive for a turn we just cancelled. No arrival order is guaranteed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Turn is generating / playing
    Active,
    /// We asked the vendor to cancel; not yet acknowledged
    CancelRequested,
    /// Vendor confirmed cancellation
    Cancelled,
    /// Vendor reported all audio for this turn delivered
    AudioDone,
    /// Turn fully finalized by the vendor
    Completed,
}

impl TurnStatus {
    /// A cancelled turn never hangs up and its late audio is dropped
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TurnStatus::CancelRequested | TurnStatus::Cancelled)
    }
}

/// Record of one AI turn
#[derive(Debug, Clone)]
pub struct Turn {
    /// Vendor-assigned identifier
    pub turn_id: String,
    /// Current status
    pub status: TurnStatus,
    /// Set at most once; guards duplicate cancel requests
    pub cancel_sent: bool,
    /// When the vendor reported audio completion
    pub audio_done_at: Option<Instant>,
    /// When the turn started, for barge-in calibration gating
    pub started_at: Instant,
}

impl Turn {
    pub fn new(turn_id: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            status: TurnStatus::Active,
            cancel_sent: false,
            audio_done_at: None,
            started_at: Instant::now(),
        }
    }

    /// Elapsed time since the turn started
    pub fn age(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

/// Hangup progression for a call; monotonic, never re-entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HangupState {
    /// No hangup requested
    #[default]
    None,
    /// A goodbye was detected; waiting for audio/queues to drain
    Pending,
    /// terminate_call was issued; terminal
    Executed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_turn_is_active() {
        let turn = Turn::new("t1");
        assert_eq!(turn.status, TurnStatus::Active);
        assert!(!turn.cancel_sent);
        assert!(turn.audio_done_at.is_none());
    }

    #[test]
    fn cancel_states_count_as_cancelled() {
        assert!(TurnStatus::CancelRequested.is_cancelled());
        assert!(TurnStatus::Cancelled.is_cancelled());
        assert!(!TurnStatus::AudioDone.is_cancelled());
        assert!(!TurnStatus::Completed.is_cancelled());
    }
}
