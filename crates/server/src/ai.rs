//! AI session plumbing
//!
//! The engine treats the AI vendor as an abstract duplex channel; the
//! concrete wire protocol lives behind [`AiSessionFactory`]. A loopback
//! implementation ships here so the telephony leg, the engine, and the
//! playback path can be exercised end to end without vendor credentials.

use async_trait::async_trait;
use call_bridge_core::{AiEvent, AiRealtimeChannel, AudioFrame, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

const AI_EVENT_CHANNEL: usize = 1024;

/// Opens one AI realtime session per call
#[async_trait]
pub trait AiSessionFactory: Send + Sync {
    /// Returns the outbound half (audio + cancel requests toward the AI)
    /// and the inbound event stream.
    async fn open_session(
        &self,
        call_id: &str,
    ) -> Result<(Arc<dyn AiRealtimeChannel>, mpsc::Receiver<AiEvent>)>;
}

/// Echoes caller speech back as an AI turn.
///
/// Buffers forwarded caller audio; after roughly a second of it, emits a
/// full turn (started, audio, audio-done, completed) containing the
/// buffered bytes. Cancel requests are acknowledged immediately. Useful
/// for smoke-testing deployments and for demos.
pub struct LoopbackAiFactory {
    /// Bytes of caller audio that trigger an echo turn
    echo_after_bytes: usize,
}

impl LoopbackAiFactory {
    pub fn new(echo_after_bytes: usize) -> Self {
        Self { echo_after_bytes }
    }
}

impl Default for LoopbackAiFactory {
    fn default() -> Self {
        // 1s of 8kHz PCM16
        Self::new(16_000)
    }
}

#[async_trait]
impl AiSessionFactory for LoopbackAiFactory {
    async fn open_session(
        &self,
        call_id: &str,
    ) -> Result<(Arc<dyn AiRealtimeChannel>, mpsc::Receiver<AiEvent>)> {
        info!(%call_id, "opening loopback ai session");
        let (event_tx, event_rx) = mpsc::channel(AI_EVENT_CHANNEL);
        let channel = Arc::new(LoopbackAiChannel {
            events: event_tx,
            buffer: Mutex::new(Vec::new()),
            echo_after_bytes: self.echo_after_bytes,
            turn_seq: Mutex::new(0),
        });
        Ok((channel, event_rx))
    }
}

struct LoopbackAiChannel {
    events: mpsc::Sender<AiEvent>,
    buffer: Mutex<Vec<u8>>,
    echo_after_bytes: usize,
    turn_seq: Mutex<u64>,
}

impl LoopbackAiChannel {
    async fn emit_turn(&self, payload: Vec<u8>) {
        let turn_id = {
            let mut seq = self.turn_seq.lock();
            *seq += 1;
            format!("echo-{}", *seq)
        };
        let _ = self
            .events
            .send(AiEvent::TurnStarted {
                turn_id: turn_id.clone(),
            })
            .await;
        let _ = self
            .events
            .send(AiEvent::AudioChunk {
                turn_id: turn_id.clone(),
                bytes: payload,
            })
            .await;
        let _ = self
            .events
            .send(AiEvent::AudioDone {
                turn_id: turn_id.clone(),
            })
            .await;
        let _ = self
            .events
            .send(AiEvent::TurnCompleted { turn_id })
            .await;
    }
}

#[async_trait]
impl AiRealtimeChannel for LoopbackAiChannel {
    async fn send_audio(&self, frame: AudioFrame) -> Result<()> {
        let full = {
            let mut buffer = self.buffer.lock();
            buffer.extend_from_slice(&frame.payload);
            if buffer.len() >= self.echo_after_bytes {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };
        if let Some(payload) = full {
            self.emit_turn(payload).await;
        }
        Ok(())
    }

    async fn request_cancel(&self, turn_id: &str) -> Result<()> {
        debug!(%turn_id, "loopback cancel acknowledged");
        let _ = self
            .events
            .send(AiEvent::TurnCancelled {
                turn_id: turn_id.to_string(),
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_echoes_a_full_turn() {
        let factory = LoopbackAiFactory::new(640);
        let (channel, mut events) = factory.open_session("CA1").await.unwrap();

        channel
            .send_audio(AudioFrame::new(vec![1u8; 320], 0))
            .await
            .unwrap();
        channel
            .send_audio(AudioFrame::new(vec![2u8; 320], 1))
            .await
            .unwrap();

        assert!(matches!(
            events.recv().await,
            Some(AiEvent::TurnStarted { .. })
        ));
        match events.recv().await {
            Some(AiEvent::AudioChunk { bytes, .. }) => assert_eq!(bytes.len(), 640),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            events.recv().await,
            Some(AiEvent::AudioDone { .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(AiEvent::TurnCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_is_acknowledged() {
        let factory = LoopbackAiFactory::default();
        let (channel, mut events) = factory.open_session("CA1").await.unwrap();
        channel.request_cancel("echo-1").await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(AiEvent::TurnCancelled { turn_id }) if turn_id == "echo-1"
        ));
    }
}
