//! Voice activity monitor
//!
//! Energy-based detection over the inbound caller frames. Speech-start
//! needs N consecutive above-threshold frames so transient line noise
//! never fires it; the run counter decays gradually on quiet frames so a
//! short intra-word pause does not chop one utterance into two.
//!
//! Two situational gates sit on top of the plain threshold:
//! - a calibration window covering the first seconds of the call
//!   (ring-back, call-setup noise, echo of the greeting), during which
//!   barge-in acceptance needs extra evidence;
//! - an echo-suppression gate while the AI is transmitting: frames are
//!   still evaluated (full duplex) but the margin and the consecutive
//!   frame count are stricter, so the AI's own line echo does not cancel
//!   its turn.

use call_bridge_config::VadSettings;
use call_bridge_core::{AudioFrame, FrameFormat, SILENCE_DB};
use std::time::Duration;
use tokio::time::Instant;

/// Detection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadState {
    /// No caller speech
    #[default]
    Quiet,
    /// Above threshold, below the consecutive-frame requirement
    PendingSpeech,
    /// Confirmed caller speech
    Speech,
    /// Below threshold, waiting out the silence requirement
    PendingQuiet,
}

/// Per-frame outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadSignal {
    Quiet,
    /// Accumulating evidence, not yet confirmed
    PendingSpeech,
    /// Nth consecutive frame crossed the threshold this frame
    SpeechStarted,
    SpeechContinuing,
    /// Sustained silence after confirmed speech
    SpeechEnded,
}

/// Voice activity monitor for one call
pub struct VoiceActivityMonitor {
    settings: VadSettings,
    frame_ms: u64,
    call_start: Instant,
    state: VadState,
    /// Rolling noise floor in dB, EMA over quiet frames
    noise_floor_db: f32,
    /// Consecutive-ish speech frame counter (decays, never hard-resets)
    speech_run: u32,
    silence_run: u32,
    /// When the current confirmed speech run began
    speech_started_at: Option<Instant>,
}

impl VoiceActivityMonitor {
    pub fn new(settings: VadSettings, format: FrameFormat) -> Self {
        let noise_floor_db = settings.energy_floor_db;
        Self {
            settings,
            frame_ms: format.frame_ms as u64,
            call_start: Instant::now(),
            state: VadState::Quiet,
            noise_floor_db,
            speech_run: 0,
            silence_run: 0,
            speech_started_at: None,
        }
    }

    /// Evaluate one inbound frame
    pub fn process(&mut self, frame: &AudioFrame, agent_speaking: bool) -> VadSignal {
        let threshold = self.threshold_db(agent_speaking);
        let required = self.required_frames(agent_speaking);
        let is_speech = frame.energy_db >= threshold;

        if !is_speech {
            // Quiet frames teach the noise floor
            let alpha = self.settings.noise_floor_alpha;
            self.noise_floor_db = (self.noise_floor_db * (1.0 - alpha)
                + frame.energy_db * alpha)
                .clamp(SILENCE_DB, -20.0);
        }

        match (self.state, is_speech) {
            (VadState::Quiet, true) => {
                self.speech_run = 1;
                self.silence_run = 0;
                if self.speech_run >= required {
                    self.confirm_speech();
                    VadSignal::SpeechStarted
                } else {
                    self.state = VadState::PendingSpeech;
                    VadSignal::PendingSpeech
                }
            }
            (VadState::PendingSpeech, true) => {
                self.speech_run += 1;
                if self.speech_run >= required {
                    self.confirm_speech();
                    VadSignal::SpeechStarted
                } else {
                    VadSignal::PendingSpeech
                }
            }
            (VadState::PendingSpeech, false) => {
                // Gradual decay instead of a hard reset
                self.speech_run = self.speech_run.saturating_sub(self.settings.counter_decay);
                if self.speech_run == 0 {
                    self.state = VadState::Quiet;
                    VadSignal::Quiet
                } else {
                    VadSignal::PendingSpeech
                }
            }
            (VadState::Speech, true) => {
                self.speech_run += 1;
                self.silence_run = 0;
                VadSignal::SpeechContinuing
            }
            (VadState::Speech, false) => {
                self.silence_run = 1;
                self.speech_run = self.speech_run.saturating_sub(self.settings.counter_decay);
                self.state = VadState::PendingQuiet;
                VadSignal::SpeechContinuing
            }
            (VadState::PendingQuiet, true) => {
                self.speech_run += 1;
                self.silence_run = 0;
                self.state = VadState::Speech;
                VadSignal::SpeechContinuing
            }
            (VadState::PendingQuiet, false) => {
                self.silence_run += 1;
                self.speech_run = self.speech_run.saturating_sub(self.settings.counter_decay);
                if self.silence_run >= self.settings.min_silence_frames {
                    self.state = VadState::Quiet;
                    self.speech_run = 0;
                    self.silence_run = 0;
                    self.speech_started_at = None;
                    VadSignal::SpeechEnded
                } else {
                    VadSignal::SpeechContinuing
                }
            }
            (VadState::Quiet, false) => VadSignal::Quiet,
        }
    }

    fn confirm_speech(&mut self) {
        self.state = VadState::Speech;
        if self.speech_started_at.is_none() {
            self.speech_started_at = Some(Instant::now());
        }
    }

    fn threshold_db(&self, agent_speaking: bool) -> f32 {
        let mut threshold =
            (self.noise_floor_db + self.settings.energy_margin_db).max(self.settings.energy_floor_db);
        if agent_speaking {
            threshold += self.settings.echo_gate_extra_margin_db;
        }
        threshold
    }

    fn required_frames(&self, agent_speaking: bool) -> u32 {
        if agent_speaking {
            self.settings.min_speech_frames + self.settings.echo_gate_extra_frames
        } else {
            self.settings.min_speech_frames
        }
    }

    /// Current state
    pub fn state(&self) -> VadState {
        self.state
    }

    /// Duration of the current continuous speech run. The frame count
    /// already includes the pre-confirmation frames, so this is never
    /// zero at the moment speech is confirmed.
    pub fn speech_run_duration(&self) -> Duration {
        let counted = Duration::from_millis(self.speech_run as u64 * self.frame_ms);
        match self.speech_started_at {
            Some(start) => start.elapsed().max(counted),
            None => counted,
        }
    }

    /// True during the first seconds of the call, when barge-in needs
    /// extra evidence
    pub fn in_calibration_window(&self) -> bool {
        self.call_start.elapsed() < Duration::from_millis(self.settings.calibration_window_ms)
    }

    /// Rolling noise floor, exposed for diagnostics
    pub fn noise_floor_db(&self) -> f32 {
        self.noise_floor_db
    }

    /// Reset after a barge-in so continued caller speech is re-evaluated
    /// from a clean run
    pub fn reset_run(&mut self) {
        self.state = VadState::Quiet;
        self.speech_run = 0;
        self.silence_run = 0;
        self.speech_started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use call_bridge_config::VadSettings;

    fn pcm16(amplitude: i16, samples: usize) -> Vec<u8> {
        std::iter::repeat(amplitude)
            .take(samples)
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }

    fn loud_frame(seq: u64) -> AudioFrame {
        AudioFrame::new(pcm16(12000, 160), seq)
    }

    fn quiet_frame(seq: u64) -> AudioFrame {
        AudioFrame::new(pcm16(20, 160), seq)
    }

    fn monitor() -> VoiceActivityMonitor {
        let settings = VadSettings {
            min_speech_frames: 3,
            min_silence_frames: 4,
            counter_decay: 1,
            echo_gate_extra_frames: 2,
            ..VadSettings::default()
        };
        VoiceActivityMonitor::new(settings, FrameFormat::default())
    }

    #[test]
    fn needs_consecutive_frames_to_confirm() {
        let mut vad = monitor();
        assert_eq!(vad.process(&loud_frame(0), false), VadSignal::PendingSpeech);
        assert_eq!(vad.process(&loud_frame(1), false), VadSignal::PendingSpeech);
        assert_eq!(vad.process(&loud_frame(2), false), VadSignal::SpeechStarted);
        assert_eq!(
            vad.process(&loud_frame(3), false),
            VadSignal::SpeechContinuing
        );
    }

    #[test]
    fn single_noise_frame_does_not_confirm() {
        let mut vad = monitor();
        assert_eq!(vad.process(&loud_frame(0), false), VadSignal::PendingSpeech);
        // One quiet frame decays the run but a later burst resumes from
        // the decayed count rather than zero.
        assert_eq!(vad.process(&quiet_frame(1), false), VadSignal::Quiet);
        assert_eq!(vad.state(), VadState::Quiet);
    }

    #[test]
    fn short_pause_does_not_end_speech() {
        let mut vad = monitor();
        for i in 0..3 {
            vad.process(&loud_frame(i), false);
        }
        assert_eq!(vad.state(), VadState::Speech);

        // Two quiet frames: below min_silence_frames, still in speech
        vad.process(&quiet_frame(3), false);
        vad.process(&quiet_frame(4), false);
        assert_eq!(vad.state(), VadState::PendingQuiet);

        assert_eq!(
            vad.process(&loud_frame(5), false),
            VadSignal::SpeechContinuing
        );
        assert_eq!(vad.state(), VadState::Speech);
    }

    #[test]
    fn sustained_silence_ends_speech() {
        let mut vad = monitor();
        for i in 0..3 {
            vad.process(&loud_frame(i), false);
        }
        let mut ended = false;
        for i in 3..10 {
            if vad.process(&quiet_frame(i), false) == VadSignal::SpeechEnded {
                ended = true;
                break;
            }
        }
        assert!(ended);
        assert_eq!(vad.state(), VadState::Quiet);
    }

    #[test]
    fn echo_gate_requires_more_frames_while_agent_speaks() {
        let mut vad = monitor();
        // 3 frames confirm when the agent is silent, but with the gate the
        // requirement is 5.
        for i in 0..3 {
            let signal = vad.process(&loud_frame(i), true);
            assert_eq!(signal, VadSignal::PendingSpeech);
        }
        assert_eq!(vad.process(&loud_frame(3), true), VadSignal::PendingSpeech);
        assert_eq!(vad.process(&loud_frame(4), true), VadSignal::SpeechStarted);
    }

    #[test]
    fn noise_floor_learns_from_quiet_frames() {
        let mut vad = monitor();
        let initial = vad.noise_floor_db();
        // Moderately noisy "quiet" frames raise the floor over time
        let noisy_quiet = AudioFrame::new(pcm16(150, 160), 0);
        for _ in 0..200 {
            vad.process(&noisy_quiet, false);
        }
        assert!(vad.noise_floor_db() > initial);
    }

    #[test]
    fn calibration_window_reflects_call_age() {
        let vad = monitor();
        assert!(vad.in_calibration_window());
    }
}
