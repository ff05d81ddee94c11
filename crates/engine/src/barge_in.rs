//! Barge-in control
//!
//! When the caller starts talking over the AI, the in-flight turn is
//! cancelled and all buffered agent audio is discarded so the caller
//! hears the AI stop almost immediately. Acting on the first confirmed
//! speech candidate is deliberate: waiting for stronger confirmation
//! costs 100-300ms of the AI talking over the caller, which reads as
//! rudeness. A false positive only costs a retried response.
//!
//! Confirmation and veto are tracked after the fact for tuning: a
//! candidate whose speech run keeps going is logged as confirmed, one
//! that collapses right away is logged as a likely false trigger. Neither
//! undoes the cancellation.

use crate::playback::PlaybackQueue;
use crate::session::CallSession;
use crate::turns::TurnLifecycle;
use call_bridge_config::{BargeInSettings, VadSettings};
use call_bridge_core::{AiRealtimeChannel, EngineEvent, TelephonyLink};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a barge-in attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeInOutcome {
    /// Turn cancelled, queues flushed
    Acted,
    /// Nothing to interrupt or gated out
    Ignored,
}

struct Candidate {
    turn_id: String,
    acted_at: Instant,
    confirmed: bool,
}

/// Cancels the in-flight turn on confirmed caller speech
pub struct BargeInController {
    settings: BargeInSettings,
    vad_settings: VadSettings,
    session: Arc<CallSession>,
    turns: Arc<TurnLifecycle>,
    queue: Arc<PlaybackQueue>,
    ai: Arc<dyn AiRealtimeChannel>,
    telephony: Arc<dyn TelephonyLink>,
    events: broadcast::Sender<EngineEvent>,
    candidate: Mutex<Option<Candidate>>,
}

impl BargeInController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: BargeInSettings,
        vad_settings: VadSettings,
        session: Arc<CallSession>,
        turns: Arc<TurnLifecycle>,
        queue: Arc<PlaybackQueue>,
        ai: Arc<dyn AiRealtimeChannel>,
        telephony: Arc<dyn TelephonyLink>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            settings,
            vad_settings,
            session,
            turns,
            queue,
            ai,
            telephony,
            events,
            candidate: Mutex::new(None),
        }
    }

    /// Caller speech confirmed; interrupt the AI if one is talking.
    ///
    /// `speech_run` is the continuous speech duration the monitor has
    /// accumulated, `in_calibration` widens the evidence requirement
    /// during the first seconds of the call.
    pub async fn on_speech_started(
        &self,
        speech_run: Duration,
        in_calibration: bool,
    ) -> BargeInOutcome {
        if !self.settings.enabled {
            return BargeInOutcome::Ignored;
        }
        // Nothing to interrupt when the AI is neither transmitting nor
        // has audio queued.
        if !self.session.is_agent_speaking() && self.queue.is_empty() {
            return BargeInOutcome::Ignored;
        }
        if speech_run < Duration::from_millis(self.settings.min_candidate_speech_ms) {
            return BargeInOutcome::Ignored;
        }
        if in_calibration && !self.passes_calibration_gate(speech_run) {
            debug!(
                call_id = %self.session.call_id,
                speech_run_ms = speech_run.as_millis() as u64,
                "barge-in candidate suppressed by calibration gate"
            );
            return BargeInOutcome::Ignored;
        }

        // At-most-once per turn: losing the claim means another path
        // already cancelled it.
        let Some(turn_id) = self.turns.try_claim_cancel() else {
            return BargeInOutcome::Ignored;
        };

        let _ = self.events.send(EngineEvent::BargeInCandidate {
            turn_id: turn_id.clone(),
            speech_run_ms: speech_run.as_millis() as u64,
        });
        info!(
            call_id = %self.session.call_id,
            %turn_id,
            speech_run_ms = speech_run.as_millis() as u64,
            "barge-in: cancelling turn"
        );

        if let Err(e) = self.ai.request_cancel(&turn_id).await {
            // The turn stays claimed; its remaining audio is dropped on
            // arrival either way.
            warn!(call_id = %self.session.call_id, %turn_id, error = %e, "cancel request failed");
        }

        let discarded = self.queue.flush();
        if let Err(e) = self.telephony.clear_buffered_audio().await {
            warn!(call_id = %self.session.call_id, error = %e, "clearing telephony buffer failed");
        }
        self.session.set_agent_speaking(false);
        debug!(
            call_id = %self.session.call_id,
            %turn_id,
            discarded_frames = discarded,
            "barge-in flush complete"
        );

        *self.candidate.lock() = Some(Candidate {
            turn_id,
            acted_at: Instant::now(),
            confirmed: false,
        });
        BargeInOutcome::Acted
    }

    /// Caller speech persisted past the candidate; log the confirmation
    pub fn on_speech_continuing(&self, speech_run: Duration) {
        let mut guard = self.candidate.lock();
        if let Some(candidate) = guard.as_mut() {
            if !candidate.confirmed
                && speech_run
                    >= Duration::from_millis(self.vad_settings.calibration_min_speech_run_ms)
            {
                candidate.confirmed = true;
                let _ = self.events.send(EngineEvent::BargeInConfirmed {
                    turn_id: candidate.turn_id.clone(),
                });
                debug!(
                    call_id = %self.session.call_id,
                    turn_id = %candidate.turn_id,
                    "barge-in confirmed by sustained speech"
                );
            }
        }
    }

    /// Caller speech ended; close out the candidate, flagging likely
    /// false triggers
    pub fn on_speech_ended(&self) {
        if let Some(candidate) = self.candidate.lock().take() {
            if !candidate.confirmed {
                info!(
                    call_id = %self.session.call_id,
                    turn_id = %candidate.turn_id,
                    held_ms = candidate.acted_at.elapsed().as_millis() as u64,
                    "barge-in ended without confirmation (possible false trigger)"
                );
            }
        }
    }

    fn passes_calibration_gate(&self, speech_run: Duration) -> bool {
        let turn_old_enough = self
            .turns
            .current_turn_age()
            .map(|age| {
                age >= Duration::from_millis(self.vad_settings.calibration_min_turn_elapsed_ms)
            })
            .unwrap_or(true);
        let run_long_enough = speech_run
            >= Duration::from_millis(self.vad_settings.calibration_min_speech_run_ms);
        turn_old_enough && run_long_enough
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use call_bridge_config::PlaybackSettings;
    use call_bridge_core::{AudioFrame, CallDirection, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockAi {
        cancels: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AiRealtimeChannel for MockAi {
        async fn send_audio(&self, _frame: AudioFrame) -> Result<()> {
            Ok(())
        }
        async fn request_cancel(&self, _turn_id: &str) -> Result<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockTelephony {
        clears: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TelephonyLink for MockTelephony {
        async fn send_frame(&self, _frame: AudioFrame) -> Result<()> {
            Ok(())
        }
        async fn clear_buffered_audio(&self) -> Result<()> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn terminate_call(&self, _call_id: &str) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        controller: BargeInController,
        ai: Arc<MockAi>,
        telephony: Arc<MockTelephony>,
        session: Arc<CallSession>,
        turns: Arc<TurnLifecycle>,
        queue: Arc<PlaybackQueue>,
    }

    fn fixture() -> Fixture {
        let (events, _) = broadcast::channel(64);
        let session = CallSession::new("CA123", CallDirection::Inbound);
        let turns = Arc::new(TurnLifecycle::new());
        let playback = PlaybackSettings::default();
        let queue = Arc::new(PlaybackQueue::new(
            playback.queue_capacity_frames,
            playback.saturation_warn_ratio,
            events.clone(),
        ));
        let ai = Arc::new(MockAi::default());
        let telephony = Arc::new(MockTelephony::default());
        let controller = BargeInController::new(
            BargeInSettings::default(),
            VadSettings::default(),
            session.clone(),
            turns.clone(),
            queue.clone(),
            ai.clone(),
            telephony.clone(),
            events,
        );
        Fixture {
            controller,
            ai,
            telephony,
            session,
            turns,
            queue,
        }
    }

    #[tokio::test]
    async fn candidate_cancels_and_flushes() {
        let f = fixture();
        f.turns.begin_turn("t1");
        f.session.set_agent_speaking(true);
        f.queue.push(AudioFrame::new(vec![0u8; 320], 0)).await;

        let outcome = f
            .controller
            .on_speech_started(Duration::from_millis(120), false)
            .await;

        assert_eq!(outcome, BargeInOutcome::Acted);
        assert_eq!(f.ai.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(f.telephony.clears.load(Ordering::SeqCst), 1);
        assert!(f.queue.is_empty());
        assert!(!f.session.is_agent_speaking());
        assert!(f.turns.should_drop_audio("t1"));
    }

    #[tokio::test]
    async fn ignored_when_agent_is_silent() {
        let f = fixture();
        f.turns.begin_turn("t1");
        let outcome = f
            .controller
            .on_speech_started(Duration::from_millis(200), false)
            .await;
        assert_eq!(outcome, BargeInOutcome::Ignored);
        assert_eq!(f.ai.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn at_most_one_cancel_per_turn() {
        let f = fixture();
        f.turns.begin_turn("t1");
        f.session.set_agent_speaking(true);
        f.controller
            .on_speech_started(Duration::from_millis(120), false)
            .await;
        // Second candidate for the same turn loses the claim
        f.session.set_agent_speaking(true);
        let outcome = f
            .controller
            .on_speech_started(Duration::from_millis(300), false)
            .await;
        assert_eq!(outcome, BargeInOutcome::Ignored);
        assert_eq!(f.ai.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn calibration_gate_requires_longer_run() {
        let f = fixture();
        f.turns.begin_turn("t1");
        f.session.set_agent_speaking(true);
        // Turn just started and the run is short: gated out during
        // calibration.
        let outcome = f
            .controller
            .on_speech_started(Duration::from_millis(150), true)
            .await;
        assert_eq!(outcome, BargeInOutcome::Ignored);
        assert_eq!(f.ai.cancels.load(Ordering::SeqCst), 0);
    }
}
