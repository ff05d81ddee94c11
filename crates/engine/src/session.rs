//! Per-call session state
//!
//! One [`CallSession`] is created on telephony connect and destroyed on
//! disconnect. It owns everything the four concurrent tasks share:
//! activity timestamps, the agent-speaking flag, and the hangup gate.
//! Fields are single-writer where possible; the multi-writer ones are
//! atomics so no task ever holds a lock across an await.

use call_bridge_core::{CallDirection, HangupState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
// tokio's Instant so time-sensitive behavior stays testable under the
// paused test clock
use tokio::time::Instant;

const HANGUP_NONE: u8 = 0;
const HANGUP_PENDING: u8 = 1;
const HANGUP_EXECUTED: u8 = 2;

/// Monotonic hangup gate: None -> Pending -> Executed, never back
pub struct HangupGate {
    state: AtomicU8,
}

impl HangupGate {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(HANGUP_NONE),
        }
    }

    pub fn state(&self) -> HangupState {
        match self.state.load(Ordering::Acquire) {
            HANGUP_PENDING => HangupState::Pending,
            HANGUP_EXECUTED => HangupState::Executed,
            _ => HangupState::None,
        }
    }

    /// Mark a hangup as requested. No-op once executed.
    pub fn mark_pending(&self) {
        let _ = self.state.compare_exchange(
            HANGUP_NONE,
            HANGUP_PENDING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Atomic check-and-act: returns true exactly once, for the caller
    /// that gets to issue terminate_call.
    pub fn try_execute(&self) -> bool {
        self.state.swap(HANGUP_EXECUTED, Ordering::AcqRel) != HANGUP_EXECUTED
    }

    pub fn is_executed(&self) -> bool {
        self.state.load(Ordering::Acquire) == HANGUP_EXECUTED
    }
}

/// Shared state for one call
pub struct CallSession {
    /// Opaque external call identifier
    pub call_id: String,
    /// Fixed for the session lifetime
    pub direction: CallDirection,
    /// When the media stream connected
    pub started_at: Instant,
    /// Updated on audio energy from either party
    last_activity: Mutex<Instant>,
    /// Set on the first confirmed caller speech (voicemail detection)
    caller_spoke: AtomicBool,
    /// True while AI audio is flowing to the wire (echo-suppression gate)
    pub agent_speaking: Arc<AtomicBool>,
    /// The single hangup authority's gate
    pub hangup: HangupGate,
}

impl CallSession {
    pub fn new(call_id: impl Into<String>, direction: CallDirection) -> Arc<Self> {
        Arc::new(Self {
            call_id: call_id.into(),
            direction,
            started_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
            caller_spoke: AtomicBool::new(false),
            agent_speaking: Arc::new(AtomicBool::new(false)),
            hangup: HangupGate::new(),
        })
    }

    /// Record audio energy from either party
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last audio energy in either direction
    pub fn silence_duration(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Total call age
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn note_caller_spoke(&self) {
        self.caller_spoke.store(true, Ordering::Release);
    }

    pub fn caller_has_spoken(&self) -> bool {
        self.caller_spoke.load(Ordering::Acquire)
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.agent_speaking.load(Ordering::Acquire)
    }

    pub fn set_agent_speaking(&self, speaking: bool) {
        self.agent_speaking.store(speaking, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hangup_gate_executes_exactly_once() {
        let gate = HangupGate::new();
        assert_eq!(gate.state(), HangupState::None);

        gate.mark_pending();
        assert_eq!(gate.state(), HangupState::Pending);

        assert!(gate.try_execute());
        assert!(!gate.try_execute());
        assert!(!gate.try_execute());
        assert_eq!(gate.state(), HangupState::Executed);
    }

    #[test]
    fn executed_gate_ignores_late_pending() {
        let gate = HangupGate::new();
        assert!(gate.try_execute());
        gate.mark_pending();
        assert_eq!(gate.state(), HangupState::Executed);
    }

    #[test]
    fn session_tracks_caller_speech() {
        let session = CallSession::new("CA123", CallDirection::Inbound);
        assert!(!session.caller_has_spoken());
        session.note_caller_spoke();
        assert!(session.caller_has_spoken());
    }
}
