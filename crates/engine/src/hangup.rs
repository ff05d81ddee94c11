//! Hangup execution
//!
//! The single authority for ending a call. Every hangup path routes
//! through [`HangupExecutor::maybe_execute`], whose atomic gate makes
//! `terminate_call` fire at most once no matter how many triggers race.
//!
//! The farewell path is the tricky one: the AI's final transcript (which
//! carries the goodbye phrase) and its audio-done notification arrive on
//! independent streams in either order. Whichever side lands second runs
//! the precondition chain; a cancelled farewell (the caller barged in) is
//! a veto, not a hangup.

use crate::playback::PlaybackQueue;
use crate::session::CallSession;
use crate::turns::TurnLifecycle;
use call_bridge_config::HangupSettings;
use call_bridge_core::{
    EngineEvent, HangupSkipReason, HangupState, HangupTrigger, TelephonyLink,
};
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Executes hangups at most once per call
pub struct HangupExecutor {
    settings: HangupSettings,
    session: Arc<CallSession>,
    turns: Arc<TurnLifecycle>,
    queue: Arc<PlaybackQueue>,
    telephony: Arc<dyn TelephonyLink>,
    events: broadcast::Sender<EngineEvent>,
    goodbye: Regex,
    /// Turn whose transcript matched a goodbye phrase
    farewell_turn: Mutex<Option<String>>,
}

impl HangupExecutor {
    pub fn new(
        settings: HangupSettings,
        session: Arc<CallSession>,
        turns: Arc<TurnLifecycle>,
        queue: Arc<PlaybackQueue>,
        telephony: Arc<dyn TelephonyLink>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let goodbye = goodbye_matcher(&settings.goodbye_phrases);
        Self {
            settings,
            session,
            turns,
            queue,
            telephony,
            events,
            goodbye,
            farewell_turn: Mutex::new(None),
        }
    }

    /// Final transcript for a turn. A goodbye match arms the hangup; if
    /// the turn's audio already finished (the transcript lost the race)
    /// this side executes.
    pub async fn on_final_transcript(&self, turn_id: &str, text: &str) {
        if !self.goodbye.is_match(text) {
            return;
        }
        info!(
            call_id = %self.session.call_id,
            %turn_id,
            "goodbye phrase detected in final transcript"
        );
        self.session.hangup.mark_pending();
        *self.farewell_turn.lock() = Some(turn_id.to_string());

        // Tag the request with which ordering we are in: audio already
        // done means the transcript lost the race and executes here.
        let audio_already_done = self.turns.audio_done(turn_id);
        let trigger = if audio_already_done {
            HangupTrigger::TranscriptRace
        } else {
            HangupTrigger::AudioDone
        };
        let _ = self.events.send(EngineEvent::HangupRequested {
            turn_id: turn_id.to_string(),
            trigger,
        });

        if audio_already_done {
            self.maybe_execute(HangupTrigger::TranscriptRace, Some(turn_id))
                .await;
        }
    }

    /// Audio for a turn finished playing out from the AI side. Executes
    /// the armed hangup when this is the farewell turn.
    pub async fn on_audio_done(&self, turn_id: &str) {
        let is_farewell = self
            .farewell_turn
            .lock()
            .as_deref()
            .map(|t| t == turn_id)
            .unwrap_or(false);
        if is_farewell {
            self.maybe_execute(HangupTrigger::AudioDone, Some(turn_id))
                .await;
        }
    }

    /// Run the precondition chain and, if it passes, terminate the call.
    ///
    /// Watchdog triggers carry no turn and skip the turn preconditions.
    /// Returns true when this invocation performed the termination.
    pub async fn maybe_execute(&self, trigger: HangupTrigger, turn_id: Option<&str>) -> bool {
        if let Some(reason) = self.check_preconditions(trigger, turn_id) {
            debug!(
                call_id = %self.session.call_id,
                ?trigger,
                ?reason,
                "hangup skipped"
            );
            let _ = self
                .events
                .send(EngineEvent::HangupSkipped { trigger, reason });
            return false;
        }

        // Let the farewell finish playing to the wire, but never wait
        // forever on a stalled telephony leg.
        let mut effective = trigger;
        if !self.queue.is_empty() {
            let drain = Duration::from_millis(self.settings.drain_timeout_ms);
            if tokio::time::timeout(drain, self.queue.await_empty())
                .await
                .is_err()
            {
                warn!(
                    call_id = %self.session.call_id,
                    remaining_frames = self.queue.len(),
                    "playback drain timed out, hanging up anyway"
                );
                effective = HangupTrigger::DrainTimeout;
            }

            // The caller may have barged in while the farewell drained;
            // the preconditions must still hold right before the gate.
            if let Some(reason) = self.check_preconditions(trigger, turn_id) {
                debug!(
                    call_id = %self.session.call_id,
                    trigger = ?effective,
                    ?reason,
                    "hangup skipped after drain"
                );
                let _ = self.events.send(EngineEvent::HangupSkipped {
                    trigger: effective,
                    reason,
                });
                return false;
            }
        }

        if !self.session.hangup.try_execute() {
            let _ = self.events.send(EngineEvent::HangupSkipped {
                trigger: effective,
                reason: HangupSkipReason::AlreadyExecuted,
            });
            return false;
        }

        info!(call_id = %self.session.call_id, trigger = ?effective, "terminating call");
        if let Err(e) = self.telephony.terminate_call(&self.session.call_id).await {
            // The gate stays executed; the telephony side will drop the
            // stream on its own timeout.
            warn!(call_id = %self.session.call_id, error = %e, "terminate_call failed");
        }
        let _ = self.events.send(EngineEvent::HangupExecuted {
            trigger: effective,
            turn_id: turn_id.map(|t| t.to_string()),
        });
        true
    }

    fn check_preconditions(
        &self,
        trigger: HangupTrigger,
        turn_id: Option<&str>,
    ) -> Option<HangupSkipReason> {
        if self.session.hangup.is_executed() {
            return Some(HangupSkipReason::AlreadyExecuted);
        }
        if trigger.is_watchdog() {
            // Watchdog hangups do not depend on a farewell turn
            return None;
        }
        if self.session.hangup.state() == HangupState::None {
            return Some(HangupSkipReason::NotRequested);
        }
        let turn_id = match turn_id {
            Some(id) => id,
            None => return Some(HangupSkipReason::TurnMismatch),
        };
        let farewell_matches = self
            .farewell_turn
            .lock()
            .as_deref()
            .map(|t| t == turn_id)
            .unwrap_or(false);
        if !farewell_matches {
            return Some(HangupSkipReason::TurnMismatch);
        }
        // A barged-in farewell means the caller still wants to talk
        if self
            .turns
            .status(turn_id)
            .map(|s| s.is_cancelled())
            .unwrap_or(false)
        {
            return Some(HangupSkipReason::TurnCancelled);
        }
        if !self.turns.audio_done(turn_id) {
            return Some(HangupSkipReason::AudioNotDone);
        }
        None
    }
}

/// Build the end-anchored goodbye matcher from the configured phrases.
/// Trailing punctuation and whitespace after the phrase are tolerated.
/// Blank phrases are dropped: an empty alternative would turn the
/// matcher into match-everything.
fn goodbye_matcher(phrases: &[String]) -> Regex {
    let alternatives = phrases
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    if alternatives.is_empty() {
        return Regex::new(r"(?i)goodbye[[:space:][:punct:]]*$").unwrap();
    }
    let pattern = format!(r"(?i)({alternatives})[[:space:][:punct:]]*$");
    // Escaped alternation over non-empty phrases cannot fail
    Regex::new(&pattern).unwrap_or_else(|_| Regex::new(r"(?i)goodbye[[:punct:]]*$").unwrap())
}
