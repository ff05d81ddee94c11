//! Per-call engine
//!
//! Wires one call's four tasks together:
//!
//! 1. inbound: caller frames -> activity detection -> barge-in -> AI
//! 2. AI events: turn lifecycle, response audio -> playback queue,
//!    transcripts -> hangup arming
//! 3. clocked sender: playback queue -> telephony at the wire rate
//! 4. silence watchdog
//!
//! The engine owns a watch-channel shutdown signal. Telephony disconnect
//! or an executed hangup flips it; every task observes it and exits.

use crate::barge_in::{BargeInController, BargeInOutcome};
use crate::clock::ClockedSender;
use crate::framer::Framer;
use crate::hangup::HangupExecutor;
use crate::playback::PlaybackQueue;
use crate::session::CallSession;
use crate::turns::TurnLifecycle;
use crate::vad::{VadSignal, VoiceActivityMonitor};
use crate::watchdog::SilenceWatchdog;
use crate::EngineError;
use call_bridge_config::Settings;
use call_bridge_core::{
    AiEvent, AiRealtimeChannel, EngineEvent, TelephonyEvent, TelephonyLink,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One call's engine. Construct per call, run to completion.
pub struct CallEngine {
    settings: Arc<Settings>,
    session: Arc<CallSession>,
    turns: Arc<TurnLifecycle>,
    queue: Arc<PlaybackQueue>,
    barge_in: Arc<BargeInController>,
    hangup: Arc<HangupExecutor>,
    telephony: Arc<dyn TelephonyLink>,
    ai: Arc<dyn AiRealtimeChannel>,
    events: broadcast::Sender<EngineEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl CallEngine {
    pub fn new(
        settings: Arc<Settings>,
        session: Arc<CallSession>,
        telephony: Arc<dyn TelephonyLink>,
        ai: Arc<dyn AiRealtimeChannel>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let turns = Arc::new(TurnLifecycle::new());
        let queue = Arc::new(PlaybackQueue::new(
            settings.playback.queue_capacity_frames,
            settings.playback.saturation_warn_ratio,
            events.clone(),
        ));
        let barge_in = Arc::new(BargeInController::new(
            settings.barge_in.clone(),
            settings.vad.clone(),
            session.clone(),
            turns.clone(),
            queue.clone(),
            ai.clone(),
            telephony.clone(),
            events.clone(),
        ));
        let hangup = Arc::new(HangupExecutor::new(
            settings.hangup.clone(),
            session.clone(),
            turns.clone(),
            queue.clone(),
            telephony.clone(),
            events.clone(),
        ));
        Self {
            settings,
            session,
            turns,
            queue,
            barge_in,
            hangup,
            telephony,
            ai,
            events,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Subscribe to engine events (check-in requests, lifecycle,
    /// diagnostics). Safe to call before `run`.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &Arc<CallSession> {
        &self.session
    }

    /// Drive the call to completion. Returns when the telephony stream
    /// disconnects or the call is hung up.
    pub async fn run(
        self,
        telephony_rx: mpsc::Receiver<TelephonyEvent>,
        ai_rx: mpsc::Receiver<AiEvent>,
    ) -> Result<(), EngineError> {
        let format = self.settings.audio.frame_format();

        let sender = ClockedSender::new(
            self.queue.clone(),
            self.telephony.clone(),
            format.frame_duration(),
            self.session.agent_speaking.clone(),
            self.shutdown_rx.clone(),
        );
        let sender_task = tokio::spawn(sender.run());

        let watchdog = SilenceWatchdog::new(
            self.settings.watchdog.clone(),
            self.session.clone(),
            self.turns.clone(),
            self.hangup.clone(),
            self.events.clone(),
            self.shutdown_rx.clone(),
        );
        let watchdog_task = tokio::spawn(watchdog.run());

        let ai_task = tokio::spawn(Self::ai_event_loop(
            ai_rx,
            format,
            self.session.clone(),
            self.turns.clone(),
            self.queue.clone(),
            self.hangup.clone(),
            self.events.clone(),
            self.shutdown_rx.clone(),
        ));

        self.inbound_loop(telephony_rx).await;

        // Stop the other three tasks and unblock any producer parked on
        // a full queue.
        let _ = self.shutdown_tx.send(true);
        self.queue.flush();
        let _ = ai_task.await;
        let _ = watchdog_task.await;
        match sender_task.await {
            Ok(Err(e)) => {
                debug!(call_id = %self.session.call_id, error = %e, "sender finished with error");
            }
            Err(e) => warn!(call_id = %self.session.call_id, error = %e, "sender task panicked"),
            _ => {}
        }

        info!(
            call_id = %self.session.call_id,
            duration_secs = self.session.age().as_secs(),
            "call finished"
        );
        Ok(())
    }

    /// Task 1: caller media. Full duplex: every frame is both evaluated
    /// for speech and forwarded to the AI, including while the AI talks.
    async fn inbound_loop(&self, mut telephony_rx: mpsc::Receiver<TelephonyEvent>) {
        let mut vad =
            VoiceActivityMonitor::new(self.settings.vad.clone(), self.settings.audio.frame_format());
        let mut shutdown = self.shutdown_rx.clone();

        loop {
            let event = tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
                event = telephony_rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!(call_id = %self.session.call_id, "telephony stream closed");
                        let _ = self.events.send(EngineEvent::CallDisconnected);
                        return;
                    }
                },
            };

            match event {
                TelephonyEvent::Connected => {
                    info!(call_id = %self.session.call_id, "media stream connected");
                    let _ = self.events.send(EngineEvent::CallConnected);
                }
                TelephonyEvent::Media(frame) => {
                    self.handle_caller_frame(&mut vad, frame).await;
                }
                TelephonyEvent::Disconnected => {
                    info!(call_id = %self.session.call_id, "caller disconnected");
                    let _ = self.events.send(EngineEvent::CallDisconnected);
                    return;
                }
            }
        }
    }

    async fn handle_caller_frame(
        &self,
        vad: &mut VoiceActivityMonitor,
        frame: call_bridge_core::AudioFrame,
    ) {
        let signal = vad.process(&frame, self.session.is_agent_speaking());

        match signal {
            VadSignal::SpeechStarted => {
                self.session.note_caller_spoke();
                self.session.touch();
                let outcome = self
                    .barge_in
                    .on_speech_started(vad.speech_run_duration(), vad.in_calibration_window())
                    .await;
                if outcome == BargeInOutcome::Acted {
                    // Continued caller speech is a fresh utterance now
                    vad.reset_run();
                }
            }
            VadSignal::SpeechContinuing => {
                self.session.touch();
                self.barge_in.on_speech_continuing(vad.speech_run_duration());
            }
            VadSignal::SpeechEnded => {
                self.barge_in.on_speech_ended();
            }
            VadSignal::PendingSpeech | VadSignal::Quiet => {}
        }

        // Forward regardless of our local detection; the AI runs its own
        // turn-taking model on the raw stream.
        if let Err(e) = self.ai.send_audio(frame).await {
            warn!(call_id = %self.session.call_id, error = %e, "forwarding caller audio failed");
        }
    }

    /// Task 2: AI realtime events
    #[allow(clippy::too_many_arguments)]
    async fn ai_event_loop(
        mut ai_rx: mpsc::Receiver<AiEvent>,
        format: call_bridge_core::FrameFormat,
        session: Arc<CallSession>,
        turns: Arc<TurnLifecycle>,
        queue: Arc<PlaybackQueue>,
        hangup: Arc<HangupExecutor>,
        events: broadcast::Sender<EngineEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut framer = Framer::new(format);

        loop {
            let event = tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
                event = ai_rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!(call_id = %session.call_id, "ai event stream closed");
                        return;
                    }
                },
            };

            match event {
                AiEvent::TurnStarted { turn_id } => {
                    turns.begin_turn(&turn_id);
                    // Leftover bytes from a previous turn never bleed in
                    framer.reset();
                    let _ = events.send(EngineEvent::TurnStarted { turn_id });
                }
                AiEvent::AudioChunk { turn_id, bytes } => {
                    if turns.should_drop_audio(&turn_id) {
                        debug!(
                            call_id = %session.call_id,
                            %turn_id,
                            dropped_bytes = bytes.len(),
                            "dropping audio for cancelled or unknown turn"
                        );
                        continue;
                    }
                    session.set_agent_speaking(true);
                    session.touch();
                    for frame in framer.feed(&bytes) {
                        if !push_or_shutdown(&queue, &mut shutdown, frame).await {
                            return;
                        }
                    }
                }
                AiEvent::AudioDone { turn_id } => {
                    // The response tail may not fill a whole frame
                    if !turns.should_drop_audio(&turn_id) {
                        if let Some(tail) = framer.flush_padded() {
                            if !push_or_shutdown(&queue, &mut shutdown, tail).await {
                                return;
                            }
                        }
                    } else {
                        framer.reset();
                    }
                    turns.mark_audio_done(&turn_id);
                    hangup.on_audio_done(&turn_id).await;
                }
                AiEvent::TranscriptFinal { turn_id, text } => {
                    hangup.on_final_transcript(&turn_id, &text).await;
                }
                AiEvent::TurnCancelled { turn_id } => {
                    turns.mark_cancelled(&turn_id);
                    framer.reset();
                    let _ = events.send(EngineEvent::TurnCancelled { turn_id });
                }
                AiEvent::TurnCompleted { turn_id } => {
                    turns.mark_completed(&turn_id);
                    let _ = events.send(EngineEvent::TurnCompleted { turn_id });
                }
            }
        }
    }
}

/// Enqueue one frame, bailing out when shutdown fires first. A full
/// queue parks the producer mid-chunk; shutdown must still end the task.
/// Returns false when the task should stop.
async fn push_or_shutdown(
    queue: &PlaybackQueue,
    shutdown: &mut watch::Receiver<bool>,
    frame: call_bridge_core::AudioFrame,
) -> bool {
    tokio::select! {
        _ = queue.push(frame) => true,
        res = shutdown.changed() => res.is_ok() && !*shutdown.borrow(),
    }
}
