//! Turn lifecycle tracking
//!
//! One AI response is a turn. Events about a turn arrive from two sides
//! (our cancel request, the AI's own lifecycle notifications) in no
//! guaranteed order, so every transition here is idempotent and keyed by
//! turn id. A bounded history of finished turns absorbs stragglers that
//! refer to a turn we already moved past.

use call_bridge_core::{Turn, TurnStatus};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, warn};

/// Only the immediately-previous turn is retained for stragglers
const TURN_HISTORY: usize = 1;

/// Tracks the current turn and the one before it
pub struct TurnLifecycle {
    inner: Mutex<Inner>,
}

struct Inner {
    current: Option<Turn>,
    history: VecDeque<Turn>,
}

impl TurnLifecycle {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: None,
                history: VecDeque::with_capacity(TURN_HISTORY),
            }),
        }
    }

    /// Start a new turn, retiring the current one if still present
    pub fn begin_turn(&self, turn_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(prev) = inner.current.take() {
            if !matches!(prev.status, TurnStatus::Completed | TurnStatus::Cancelled) {
                warn!(
                    turn_id = %prev.turn_id,
                    status = ?prev.status,
                    "new turn started before previous finished"
                );
            }
            inner.retire(prev);
        }
        inner.current = Some(Turn::new(turn_id.to_string()));
        debug!(%turn_id, "turn started");
    }

    /// Age of the current turn, for the calibration barge-in gate
    pub fn current_turn_age(&self) -> Option<std::time::Duration> {
        self.inner.lock().current.as_ref().map(|t| t.age())
    }

    pub fn current_turn_id(&self) -> Option<String> {
        self.inner
            .lock()
            .current
            .as_ref()
            .map(|t| t.turn_id.clone())
    }

    /// Status of a turn, current or recently retired
    pub fn status(&self, turn_id: &str) -> Option<TurnStatus> {
        let inner = self.inner.lock();
        inner.find(turn_id).map(|t| t.status)
    }

    /// True when inbound audio for this turn should be dropped rather
    /// than enqueued: the turn was cancelled, or we never saw it start.
    pub fn should_drop_audio(&self, turn_id: &str) -> bool {
        let inner = self.inner.lock();
        match inner.find(turn_id) {
            Some(turn) => turn.status.is_cancelled(),
            None => true,
        }
    }

    /// Claim the right to send exactly one cancel for the current turn.
    ///
    /// Returns the turn id when this caller won the claim. Later calls,
    /// and calls after the turn finished, return None.
    pub fn try_claim_cancel(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        let turn = inner.current.as_mut()?;
        if turn.cancel_sent || !matches!(turn.status, TurnStatus::Active | TurnStatus::AudioDone) {
            return None;
        }
        turn.cancel_sent = true;
        turn.status = TurnStatus::CancelRequested;
        Some(turn.turn_id.clone())
    }

    /// AI confirmed the cancel. Idempotent, tolerates unknown turns.
    pub fn mark_cancelled(&self, turn_id: &str) {
        let mut inner = self.inner.lock();
        match inner.find_mut(turn_id) {
            Some(turn) => {
                turn.status = TurnStatus::Cancelled;
            }
            None => debug!(%turn_id, "cancel confirmation for unknown turn"),
        }
        inner.retire_if_finished(turn_id);
    }

    /// All audio for the turn has been received from the AI
    pub fn mark_audio_done(&self, turn_id: &str) {
        let mut inner = self.inner.lock();
        match inner.find_mut(turn_id) {
            Some(turn) => {
                if turn.audio_done_at.is_none() {
                    turn.audio_done_at = Some(Instant::now());
                }
                if turn.status == TurnStatus::Active {
                    turn.status = TurnStatus::AudioDone;
                }
            }
            None => debug!(%turn_id, "audio-done for unknown turn"),
        }
    }

    /// The AI considers the turn finished
    pub fn mark_completed(&self, turn_id: &str) {
        let mut inner = self.inner.lock();
        match inner.find_mut(turn_id) {
            Some(turn) => {
                // A cancelled turn stays cancelled even if a completion
                // notification arrives afterwards.
                if !turn.status.is_cancelled() {
                    turn.status = TurnStatus::Completed;
                }
            }
            None => debug!(%turn_id, "completion for unknown turn"),
        }
        inner.retire_if_finished(turn_id);
    }

    /// Audio-done state for the hangup preconditions
    pub fn audio_done(&self, turn_id: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .find(turn_id)
            .map(|t| t.audio_done_at.is_some())
            .unwrap_or(false)
    }
}

impl Default for TurnLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn find(&self, turn_id: &str) -> Option<&Turn> {
        if let Some(turn) = self.current.as_ref().filter(|t| t.turn_id == turn_id) {
            return Some(turn);
        }
        self.history.iter().find(|t| t.turn_id == turn_id)
    }

    fn find_mut(&mut self, turn_id: &str) -> Option<&mut Turn> {
        if let Some(turn) = self.current.as_mut().filter(|t| t.turn_id == turn_id) {
            return Some(turn);
        }
        self.history.iter_mut().find(|t| t.turn_id == turn_id)
    }

    fn retire(&mut self, turn: Turn) {
        if self.history.len() == TURN_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(turn);
    }

    fn retire_if_finished(&mut self, turn_id: &str) {
        let finished = self
            .current
            .as_ref()
            .map(|t| {
                t.turn_id == turn_id
                    && matches!(t.status, TurnStatus::Completed | TurnStatus::Cancelled)
            })
            .unwrap_or(false);
        if finished {
            let turn = self.current.take().unwrap();
            self.retire(turn);
        }
    }
}
