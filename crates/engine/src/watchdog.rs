//! Silence watchdog
//!
//! A low-frequency poll task that catches the calls nothing else ends:
//! dead air from both parties, a voicemail box that never speaks, and the
//! absolute call-duration backstop. Softer silences get escalating
//! check-in warnings before the line is dropped.

use crate::hangup::HangupExecutor;
use crate::session::CallSession;
use crate::turns::TurnLifecycle;
use call_bridge_config::WatchdogSettings;
use call_bridge_core::{EngineEvent, HangupTrigger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info};

/// Periodic inactivity monitor for one call
pub struct SilenceWatchdog {
    settings: WatchdogSettings,
    session: Arc<CallSession>,
    turns: Arc<TurnLifecycle>,
    executor: Arc<HangupExecutor>,
    events: broadcast::Sender<EngineEvent>,
    shutdown: watch::Receiver<bool>,
    warning_count: u32,
    last_warning_at: Option<Instant>,
}

impl SilenceWatchdog {
    pub fn new(
        settings: WatchdogSettings,
        session: Arc<CallSession>,
        turns: Arc<TurnLifecycle>,
        executor: Arc<HangupExecutor>,
        events: broadcast::Sender<EngineEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            settings,
            session,
            turns,
            executor,
            events,
            shutdown,
            warning_count: 0,
            last_warning_at: None,
        }
    }

    /// Run until shutdown or until a watchdog hangup fires
    pub async fn run(mut self) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.settings.poll_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        debug!(call_id = %self.session.call_id, "watchdog stopping");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if self.check().await {
                        return;
                    }
                }
            }
        }
    }

    /// One poll pass. Returns true when the call was terminated.
    async fn check(&mut self) -> bool {
        if self.session.hangup.is_executed() {
            return true;
        }

        if self.session.age() >= Duration::from_secs(self.settings.max_call_secs) {
            info!(call_id = %self.session.call_id, "maximum call duration reached");
            return self
                .executor
                .maybe_execute(HangupTrigger::MaxDuration, None)
                .await;
        }

        // Caller never produced confirmed speech: almost certainly a
        // voicemail box or a dead line.
        if !self.session.caller_has_spoken()
            && self.session.age() >= Duration::from_secs(self.settings.idle_after_greeting_secs)
        {
            info!(
                call_id = %self.session.call_id,
                age_secs = self.session.age().as_secs(),
                "no caller speech since call start, assuming voicemail"
            );
            return self
                .executor
                .maybe_execute(HangupTrigger::IdleAfterGreeting, None)
                .await;
        }

        // Check-in escalation only applies once the caller has engaged;
        // before that the voicemail rule above is the arbiter.
        if !self.session.caller_has_spoken() {
            return false;
        }

        let silence = self.session.silence_duration();

        // Activity since the last warning resets the escalation
        if silence < Duration::from_secs(self.settings.warning_after_secs) {
            if self.warning_count > 0 {
                debug!(call_id = %self.session.call_id, "activity resumed, warnings reset");
            }
            self.warning_count = 0;
            self.last_warning_at = None;
            return false;
        }

        // A turn in flight means the AI is mid-response; dead-air rules
        // apply only between turns.
        if self.turns.current_turn_id().is_some() || self.session.is_agent_speaking() {
            return false;
        }

        if silence >= Duration::from_secs(self.settings.hard_silence_secs) {
            info!(
                call_id = %self.session.call_id,
                silence_secs = silence.as_secs(),
                "hard silence threshold reached"
            );
            return self
                .executor
                .maybe_execute(HangupTrigger::SilenceTimeout, None)
                .await;
        }

        if self.warning_count >= self.settings.max_warnings {
            info!(
                call_id = %self.session.call_id,
                warnings = self.warning_count,
                "caller unresponsive after repeated check-ins"
            );
            return self
                .executor
                .maybe_execute(HangupTrigger::WarningsExhausted, None)
                .await;
        }

        let due = match self.last_warning_at {
            None => true,
            Some(at) => at.elapsed() >= Duration::from_secs(self.settings.warning_interval_secs),
        };
        if due {
            self.warning_count += 1;
            self.last_warning_at = Some(Instant::now());
            info!(
                call_id = %self.session.call_id,
                warning = self.warning_count,
                "requesting silence check-in"
            );
            let _ = self.events.send(EngineEvent::CheckinRequested {
                warning_count: self.warning_count,
            });
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::PlaybackQueue;
    use call_bridge_config::{HangupSettings, PlaybackSettings};
    use call_bridge_core::{AudioFrame, CallDirection, Result, TelephonyLink};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockTelephony {
        terminations: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TelephonyLink for MockTelephony {
        async fn send_frame(&self, _frame: AudioFrame) -> Result<()> {
            Ok(())
        }
        async fn clear_buffered_audio(&self) -> Result<()> {
            Ok(())
        }
        async fn terminate_call(&self, _call_id: &str) -> Result<()> {
            self.terminations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        watchdog: SilenceWatchdog,
        telephony: Arc<MockTelephony>,
        session: Arc<CallSession>,
        events: broadcast::Receiver<EngineEvent>,
        _shutdown: watch::Sender<bool>,
    }

    fn fixture(settings: WatchdogSettings) -> Fixture {
        let (events_tx, events) = broadcast::channel(64);
        let session = CallSession::new("CA7", CallDirection::Inbound);
        let turns = Arc::new(TurnLifecycle::new());
        let playback = PlaybackSettings::default();
        let queue = Arc::new(PlaybackQueue::new(
            playback.queue_capacity_frames,
            playback.saturation_warn_ratio,
            events_tx.clone(),
        ));
        let telephony = Arc::new(MockTelephony::default());
        let executor = Arc::new(HangupExecutor::new(
            HangupSettings::default(),
            session.clone(),
            turns.clone(),
            queue,
            telephony.clone(),
            events_tx.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watchdog = SilenceWatchdog::new(
            settings,
            session.clone(),
            turns,
            executor,
            events_tx,
            shutdown_rx,
        );
        Fixture {
            watchdog,
            telephony,
            session,
            events,
            _shutdown: shutdown_tx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn voicemail_hangs_up_when_caller_never_speaks() {
        let settings = WatchdogSettings {
            idle_after_greeting_secs: 30,
            ..WatchdogSettings::default()
        };
        let mut f = fixture(settings);
        assert!(!f.watchdog.check().await);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(f.watchdog.check().await);
        assert_eq!(f.telephony.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_speech_disarms_voicemail_detection() {
        let settings = WatchdogSettings {
            idle_after_greeting_secs: 30,
            hard_silence_secs: 3600,
            warning_after_secs: 3600,
            ..WatchdogSettings::default()
        };
        let mut f = fixture(settings);
        f.session.note_caller_spoke();
        f.session.touch();

        tokio::time::advance(Duration::from_secs(31)).await;
        f.session.touch();
        assert!(!f.watchdog.check().await);
        assert_eq!(f.telephony.terminations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn warnings_escalate_then_hang_up() {
        let settings = WatchdogSettings {
            warning_after_secs: 10,
            warning_interval_secs: 8,
            max_warnings: 2,
            hard_silence_secs: 3600,
            idle_after_greeting_secs: 3600,
            max_call_secs: 7200,
            ..WatchdogSettings::default()
        };
        let mut f = fixture(settings);
        f.session.note_caller_spoke();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!f.watchdog.check().await);
        assert!(matches!(
            f.events.try_recv(),
            Ok(EngineEvent::CheckinRequested { warning_count: 1 })
        ));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!f.watchdog.check().await);
        assert!(matches!(
            f.events.try_recv(),
            Ok(EngineEvent::CheckinRequested { warning_count: 2 })
        ));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(f.watchdog.check().await);
        assert_eq!(f.telephony.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_warning_escalation() {
        let settings = WatchdogSettings {
            warning_after_secs: 10,
            hard_silence_secs: 3600,
            idle_after_greeting_secs: 3600,
            max_call_secs: 7200,
            ..WatchdogSettings::default()
        };
        let mut f = fixture(settings);
        f.session.note_caller_spoke();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!f.watchdog.check().await);
        assert_eq!(f.watchdog.warning_count, 1);

        // Caller speaks again; escalation starts over
        f.session.touch();
        assert!(!f.watchdog.check().await);
        assert_eq!(f.watchdog.warning_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn max_duration_is_an_absolute_backstop() {
        let settings = WatchdogSettings {
            max_call_secs: 1800,
            ..WatchdogSettings::default()
        };
        let mut f = fixture(settings);
        f.session.note_caller_spoke();
        // Activity does not matter past the cap
        f.session.touch();
        tokio::time::advance(Duration::from_secs(1801)).await;
        f.session.touch();
        assert!(f.watchdog.check().await);
        assert_eq!(f.telephony.terminations.load(Ordering::SeqCst), 1);
    }
}
