//! Main settings module
//!
//! Every numeric threshold the engine uses lives here rather than in the
//! code: VAD energy margins, consecutive-frame counts, silence timeouts
//! and goodbye phrases were all retuned in production more than once, so
//! they are configuration inputs with documented defaults.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use call_bridge_core::FrameFormat;

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Audio frame format for the telephony leg
    #[serde(default)]
    pub audio: AudioSettings,

    /// Outbound playback queue
    #[serde(default)]
    pub playback: PlaybackSettings,

    /// Voice activity monitoring
    #[serde(default)]
    pub vad: VadSettings,

    /// Barge-in detection
    #[serde(default)]
    pub barge_in: BargeInSettings,

    /// Goodbye detection and hangup drain
    #[serde(default)]
    pub hangup: HangupSettings,

    /// Silence watchdog thresholds
    #[serde(default)]
    pub watchdog: WatchdogSettings,

    /// Server binding and capacity
    #[serde(default)]
    pub server: ServerSettings,
}

/// Telephony frame format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Sample rate of the media stream in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,
    /// Frame interval in milliseconds
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,
    /// Bytes per sample (2 for PCM16)
    #[serde(default = "default_bytes_per_sample")]
    pub bytes_per_sample: u32,
}

fn default_sample_rate() -> u32 {
    8000
}
fn default_frame_ms() -> u32 {
    20
}
fn default_bytes_per_sample() -> u32 {
    2
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate(),
            frame_ms: default_frame_ms(),
            bytes_per_sample: default_bytes_per_sample(),
        }
    }
}

impl AudioSettings {
    /// Build the immutable per-call frame format
    pub fn frame_format(&self) -> FrameFormat {
        FrameFormat {
            sample_rate_hz: self.sample_rate_hz,
            frame_ms: self.frame_ms,
            bytes_per_sample: self.bytes_per_sample,
        }
    }
}

/// Playback queue sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// Queue capacity in frames. Steady-state capacity must exceed several
    /// seconds of buffering: the AI produces audio in bursts far faster
    /// than the 50 fps the telephony leg drains.
    #[serde(default = "default_queue_capacity_frames")]
    pub queue_capacity_frames: usize,
    /// Log a capacity warning once the queue depth crosses this fraction
    #[serde(default = "default_saturation_warn_ratio")]
    pub saturation_warn_ratio: f32,
}

fn default_queue_capacity_frames() -> usize {
    500 // 10s of audio at 20ms frames
}
fn default_saturation_warn_ratio() -> f32 {
    0.9
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            queue_capacity_frames: default_queue_capacity_frames(),
            saturation_warn_ratio: default_saturation_warn_ratio(),
        }
    }
}

/// Voice activity monitor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    /// Speech must exceed the rolling noise floor by this margin (dB)
    #[serde(default = "default_energy_margin_db")]
    pub energy_margin_db: f32,
    /// Absolute floor below which a frame is never speech (dB)
    #[serde(default = "default_energy_floor_db")]
    pub energy_floor_db: f32,
    /// EMA coefficient for the rolling noise floor (applied on quiet frames)
    #[serde(default = "default_noise_floor_alpha")]
    pub noise_floor_alpha: f32,
    /// Consecutive above-threshold frames required for speech-start
    #[serde(default = "default_min_speech_frames")]
    pub min_speech_frames: u32,
    /// How much the speech-run counter decays per below-threshold frame.
    /// Gradual decay keeps short intra-word pauses from chopping a run.
    #[serde(default = "default_counter_decay")]
    pub counter_decay: u32,
    /// Quiet frames required before speech-end is reported
    #[serde(default = "default_min_silence_frames")]
    pub min_silence_frames: u32,
    /// Calibration window from call start (ring-back, greeting echo)
    #[serde(default = "default_calibration_window_ms")]
    pub calibration_window_ms: u64,
    /// During calibration, barge-in needs at least this much time since
    /// turn start
    #[serde(default = "default_calibration_min_turn_elapsed_ms")]
    pub calibration_min_turn_elapsed_ms: u64,
    /// During calibration, barge-in needs at least this much continuous
    /// speech
    #[serde(default = "default_calibration_min_speech_run_ms")]
    pub calibration_min_speech_run_ms: u64,
    /// Extra energy margin while the AI is transmitting (line echo gate)
    #[serde(default = "default_echo_gate_extra_margin_db")]
    pub echo_gate_extra_margin_db: f32,
    /// Extra consecutive frames required while the AI is transmitting
    #[serde(default = "default_echo_gate_extra_frames")]
    pub echo_gate_extra_frames: u32,
}

fn default_energy_margin_db() -> f32 {
    12.0
}
fn default_energy_floor_db() -> f32 {
    -55.0
}
fn default_noise_floor_alpha() -> f32 {
    0.05
}
fn default_min_speech_frames() -> u32 {
    5 // 100ms at 20ms frames
}
fn default_counter_decay() -> u32 {
    1
}
fn default_min_silence_frames() -> u32 {
    25 // 500ms
}
fn default_calibration_window_ms() -> u64 {
    4000
}
fn default_calibration_min_turn_elapsed_ms() -> u64 {
    1200
}
fn default_calibration_min_speech_run_ms() -> u64 {
    400
}
fn default_echo_gate_extra_margin_db() -> f32 {
    6.0
}
fn default_echo_gate_extra_frames() -> u32 {
    3
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            energy_margin_db: default_energy_margin_db(),
            energy_floor_db: default_energy_floor_db(),
            noise_floor_alpha: default_noise_floor_alpha(),
            min_speech_frames: default_min_speech_frames(),
            counter_decay: default_counter_decay(),
            min_silence_frames: default_min_silence_frames(),
            calibration_window_ms: default_calibration_window_ms(),
            calibration_min_turn_elapsed_ms: default_calibration_min_turn_elapsed_ms(),
            calibration_min_speech_run_ms: default_calibration_min_speech_run_ms(),
            echo_gate_extra_margin_db: default_echo_gate_extra_margin_db(),
            echo_gate_extra_frames: default_echo_gate_extra_frames(),
        }
    }
}

/// Barge-in controller tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BargeInSettings {
    /// Enable barge-in cancellation
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum continuous caller speech before a candidate fires (ms)
    #[serde(default = "default_min_candidate_speech_ms")]
    pub min_candidate_speech_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_min_candidate_speech_ms() -> u64 {
    100
}

impl Default for BargeInSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            min_candidate_speech_ms: default_min_candidate_speech_ms(),
        }
    }
}

/// Goodbye detection and hangup drain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HangupSettings {
    /// Closing phrases matched at the end of the AI's final transcript.
    /// Kept small and strict by design; matched case-insensitively with
    /// trailing punctuation/whitespace tolerated.
    #[serde(default = "default_goodbye_phrases")]
    pub goodbye_phrases: Vec<String>,
    /// Bounded wait for the farewell to finish playing before the
    /// fallback hangup fires (ms)
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_goodbye_phrases() -> Vec<String> {
    [
        "goodbye",
        "bye for now",
        "have a great day",
        "have a good day",
        "thank you for calling",
        "talk to you soon",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_drain_timeout_ms() -> u64 {
    8000
}

impl Default for HangupSettings {
    fn default() -> Self {
        Self {
            goodbye_phrases: default_goodbye_phrases(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Silence watchdog thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogSettings {
    /// Poll interval (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Hard silence from both parties with no turn in flight (s)
    #[serde(default = "default_hard_silence_secs")]
    pub hard_silence_secs: u64,
    /// Caller never spoke after the greeting: assume voicemail (s)
    #[serde(default = "default_idle_after_greeting_secs")]
    pub idle_after_greeting_secs: u64,
    /// First check-in warning after this much silence (s)
    #[serde(default = "default_warning_after_secs")]
    pub warning_after_secs: u64,
    /// Subsequent warnings this far apart (s)
    #[serde(default = "default_warning_interval_secs")]
    pub warning_interval_secs: u64,
    /// Hang up instead of warning again past this count
    #[serde(default = "default_max_warnings")]
    pub max_warnings: u32,
    /// Absolute backstop on call duration (s)
    #[serde(default = "default_max_call_secs")]
    pub max_call_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_hard_silence_secs() -> u64 {
    20
}
fn default_idle_after_greeting_secs() -> u64 {
    30
}
fn default_warning_after_secs() -> u64 {
    10
}
fn default_warning_interval_secs() -> u64 {
    8
}
fn default_max_warnings() -> u32 {
    2
}
fn default_max_call_secs() -> u64 {
    1800
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            hard_silence_secs: default_hard_silence_secs(),
            idle_after_greeting_secs: default_idle_after_greeting_secs(),
            warning_after_secs: default_warning_after_secs(),
            warning_interval_secs: default_warning_interval_secs(),
            max_warnings: default_max_warnings(),
            max_call_secs: default_max_call_secs(),
        }
    }
}

/// Server binding and capacity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum concurrent calls
    #[serde(default = "default_max_calls")]
    pub max_calls: usize,
    /// Registry cleanup interval (s)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_max_calls() -> usize {
    200
}
fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_calls: default_max_calls(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from an optional TOML file plus `CALL_BRIDGE__`-prefixed
    /// environment overrides (e.g. `CALL_BRIDGE__WATCHDOG__HARD_SILENCE_SECS`)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("CALL_BRIDGE")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.frame_ms == 0 {
            return Err(ConfigError::Invalid("audio.frame_ms must be > 0".into()));
        }
        if self.audio.sample_rate_hz == 0 {
            return Err(ConfigError::Invalid(
                "audio.sample_rate_hz must be > 0".into(),
            ));
        }
        if self.audio.frame_format().bytes_per_frame() == 0 {
            return Err(ConfigError::Invalid(
                "audio settings yield a zero-byte frame".into(),
            ));
        }

        // Queue must hold several seconds of audio or bursty AI output
        // backpressures immediately and stalls the event reader.
        let frames_per_sec = 1000 / self.audio.frame_ms as usize;
        if self.playback.queue_capacity_frames < frames_per_sec * 3 {
            return Err(ConfigError::Invalid(format!(
                "playback.queue_capacity_frames ({}) is under 3 seconds of audio",
                self.playback.queue_capacity_frames
            )));
        }
        if !(0.1..=1.0).contains(&self.playback.saturation_warn_ratio) {
            return Err(ConfigError::Invalid(
                "playback.saturation_warn_ratio must be in [0.1, 1.0]".into(),
            ));
        }

        if self.vad.min_speech_frames == 0 {
            return Err(ConfigError::Invalid(
                "vad.min_speech_frames must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.vad.noise_floor_alpha) {
            return Err(ConfigError::Invalid(
                "vad.noise_floor_alpha must be in [0.0, 1.0]".into(),
            ));
        }

        if self.hangup.goodbye_phrases.is_empty() {
            return Err(ConfigError::Invalid(
                "hangup.goodbye_phrases must not be empty".into(),
            ));
        }
        // A blank phrase would become an empty regex alternative and
        // match every transcript.
        if self
            .hangup
            .goodbye_phrases
            .iter()
            .any(|p| p.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "hangup.goodbye_phrases must not contain blank phrases".into(),
            ));
        }

        if self.watchdog.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "watchdog.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.watchdog.hard_silence_secs >= self.watchdog.max_call_secs {
            return Err(ConfigError::Invalid(
                "watchdog.hard_silence_secs must be below watchdog.max_call_secs".into(),
            ));
        }

        if self.server.max_calls == 0 {
            return Err(ConfigError::Invalid("server.max_calls must be > 0".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn default_queue_exceeds_several_seconds() {
        let s = Settings::default();
        let frames_per_sec = 1000 / s.audio.frame_ms as usize;
        assert!(s.playback.queue_capacity_frames >= frames_per_sec * 5);
    }

    #[test]
    fn undersized_queue_rejected() {
        let mut s = Settings::default();
        s.playback.queue_capacity_frames = 10;
        assert!(s.validate().is_err());
    }

    #[test]
    fn empty_goodbye_set_rejected() {
        let mut s = Settings::default();
        s.hangup.goodbye_phrases.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn blank_goodbye_phrase_rejected() {
        let mut s = Settings::default();
        s.hangup.goodbye_phrases.push("   ".to_string());
        assert!(s.validate().is_err());
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "[watchdog]\nhard_silence_secs = 15\n\n[vad]\nmin_speech_frames = 7\n"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.watchdog.hard_silence_secs, 15);
        assert_eq!(settings.vad.min_speech_frames, 7);
        // Untouched sections keep defaults
        assert_eq!(settings.audio.frame_ms, 20);
    }
}
