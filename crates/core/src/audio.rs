//! Audio frame types and utilities
//!
//! The engine treats audio as opaque fixed-size binary frames: one frame
//! per fixed interval (20ms by default), PCM16 little-endian on the wire.
//! Codec internals are out of scope; the only thing the engine ever
//! computes from the payload is RMS energy for voice-activity detection.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum representable energy (digital silence)
pub const SILENCE_DB: f32 = -96.0;

/// Fixed frame format for one call leg
///
/// Telephony media streams deliver audio at a fixed sample rate and frame
/// interval for the whole call, so this is immutable per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    /// Sample rate in Hz (8000 for telephony)
    pub sample_rate_hz: u32,
    /// Frame interval in milliseconds
    pub frame_ms: u32,
    /// Bytes per sample (2 for PCM16)
    pub bytes_per_sample: u32,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            sample_rate_hz: 8000,
            frame_ms: 20,
            bytes_per_sample: 2,
        }
    }
}

impl FrameFormat {
    /// Samples in one frame
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate_hz as usize * self.frame_ms as usize) / 1000
    }

    /// Payload size of one complete frame in bytes
    pub fn bytes_per_frame(&self) -> usize {
        self.samples_per_frame() * self.bytes_per_sample as usize
    }

    /// Duration of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }
}

/// One fixed-duration audio frame with ordering metadata
///
/// Produced by the framer, consumed exactly once by the clocked sender
/// (outbound) or fed to the voice-activity monitor (inbound).
#[derive(Clone)]
pub struct AudioFrame {
    /// Opaque payload, exactly one frame interval of audio
    pub payload: Arc<[u8]>,
    /// Monotonic sequence number within the call leg
    pub sequence: u64,
    /// When the frame was produced/received
    pub timestamp: Instant,
    /// RMS energy in dB, computed from the PCM16 payload at construction
    pub energy_db: f32,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("payload_len", &self.payload.len())
            .field("sequence", &self.sequence)
            .field("energy_db", &self.energy_db)
            .finish()
    }
}

impl AudioFrame {
    /// Create a frame from a raw PCM16 payload
    pub fn new(payload: Vec<u8>, sequence: u64) -> Self {
        let energy_db = rms_energy_db(&payload);
        Self {
            payload: payload.into(),
            sequence,
            timestamp: Instant::now(),
            energy_db,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True when the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Energy check against a threshold
    pub fn is_likely_silence(&self, threshold_db: f32) -> bool {
        self.energy_db < threshold_db
    }
}

/// RMS energy of a PCM16 little-endian payload, in dB relative to full scale
pub fn rms_energy_db(payload: &[u8]) -> f32 {
    if payload.len() < 2 {
        return SILENCE_DB;
    }

    let mut sum_squares = 0.0f64;
    let mut count = 0usize;
    for chunk in payload.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f64 / 32768.0;
        sum_squares += sample * sample;
        count += 1;
    }

    let rms = (sum_squares / count as f64).sqrt() as f32;
    if rms > 0.0 {
        (20.0 * rms.log10()).max(SILENCE_DB)
    } else {
        SILENCE_DB
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn frame_format_sizes() {
        let fmt = FrameFormat::default();
        assert_eq!(fmt.samples_per_frame(), 160);
        assert_eq!(fmt.bytes_per_frame(), 320);
        assert_eq!(fmt.frame_duration(), Duration::from_millis(20));
    }

    #[test]
    fn silence_has_floor_energy() {
        let frame = AudioFrame::new(pcm16(&[0; 160]), 0);
        assert_eq!(frame.energy_db, SILENCE_DB);
        assert!(frame.is_likely_silence(-50.0));
    }

    #[test]
    fn loud_frame_has_high_energy() {
        let frame = AudioFrame::new(pcm16(&[16000; 160]), 0);
        assert!(frame.energy_db > -10.0);
        assert!(!frame.is_likely_silence(-50.0));
    }

    #[test]
    fn empty_payload_is_silence() {
        assert_eq!(rms_energy_db(&[]), SILENCE_DB);
    }
}
