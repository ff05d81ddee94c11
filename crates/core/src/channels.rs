//! Abstract duplex channel traits
//!
//! The engine never speaks a vendor wire protocol directly. The telephony
//! leg and the AI realtime channel are injected behind these traits; the
//! server crate provides the WebSocket-backed implementations and tests
//! provide mocks.

use crate::audio::AudioFrame;
use crate::error::Result;
use async_trait::async_trait;

/// Outbound half of the telephony media stream
#[async_trait]
pub trait TelephonyLink: Send + Sync {
    /// Transmit one fixed-duration frame to the caller
    async fn send_frame(&self, frame: AudioFrame) -> Result<()>;

    /// Tell the carrier to discard any audio it has buffered beyond our
    /// playback queue (barge-in path; explicit, not silence-over-time)
    async fn clear_buffered_audio(&self) -> Result<()>;

    /// Terminate the call leg. Only the hangup executor calls this.
    async fn terminate_call(&self, call_id: &str) -> Result<()>;
}

/// Outbound half of the AI realtime channel
#[async_trait]
pub trait AiRealtimeChannel: Send + Sync {
    /// Forward one caller audio frame. Full duplex: called regardless of
    /// whether the AI is currently speaking.
    async fn send_audio(&self, frame: AudioFrame) -> Result<()>;

    /// Ask the vendor to cancel the in-flight turn. Advisory: audio for
    /// the turn may still trickle in afterwards, and the vendor may
    /// report the turn as already finished.
    async fn request_cancel(&self, turn_id: &str) -> Result<()>;
}
