//! Media stream WebSocket handler
//!
//! Speaks the telephony provider's media-stream protocol: JSON text
//! frames tagged by `event` (`connected`/`start`/`media`/`stop`) with
//! base64 audio payloads, Twilio Media Streams shape. The handler adapts
//! the socket to the engine's abstract telephony channel in both
//! directions: inbound media becomes `TelephonyEvent`s, and a
//! [`MediaStreamLink`] writes outbound `media`/`clear` frames and the
//! closing handshake.

use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use call_bridge_core::{
    AudioFrame, CallDirection, Error, Result, TelephonyEvent, TelephonyLink,
};
use call_bridge_engine::{CallEngine, CallSession, Framer};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const OUTBOUND_CHANNEL: usize = 256;
const MEDIA_CHANNEL: usize = 512;

/// Inbound media-stream messages
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum StreamMessage {
    Connected {},
    Start {
        start: StartMeta,
    },
    Media {
        media: MediaPayload,
    },
    Stop {},
    /// `mark` acknowledgements and anything newer we don't consume
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
struct StartMeta {
    #[serde(rename = "streamSid")]
    stream_sid: String,
    #[serde(rename = "callSid")]
    call_sid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    payload: String,
}

/// GET /ws — media stream upgrade
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_CHANNEL);

    // Single writer task owns the sink; everything outbound goes through
    // the channel so the link and the handler never interleave writes.
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // The stream is usable only after `start` delivers the ids
    let meta = match await_start(&mut stream).await {
        Some(meta) => meta,
        None => {
            debug!("socket closed before start event");
            drop(out_tx);
            let _ = writer.await;
            return;
        }
    };
    let call_id = meta
        .call_sid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let stream_sid = meta.stream_sid.clone();
    info!(%call_id, %stream_sid, "media stream started");

    let session = CallSession::new(call_id.clone(), CallDirection::Inbound);
    if let Err(e) = state.registry.register(session.clone()) {
        warn!(%call_id, error = %e, "rejecting call");
        let _ = out_tx.send(Message::Close(None)).await;
        let _ = writer.await;
        return;
    }
    crate::metrics::record_call_started();

    let link: Arc<dyn TelephonyLink> = Arc::new(MediaStreamLink {
        outbound: out_tx.clone(),
        stream_sid,
    });

    let (ai_channel, ai_rx) = match state.ai_factory.open_session(&call_id).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(%call_id, error = %e, "failed to open ai session");
            state.registry.remove(&call_id);
            let _ = out_tx.send(Message::Close(None)).await;
            let _ = writer.await;
            return;
        }
    };

    let engine = CallEngine::new(state.settings.clone(), session.clone(), link, ai_channel);
    tokio::spawn(crate::metrics::record_engine_events(engine.subscribe()));

    let (media_tx, media_rx) = mpsc::channel::<TelephonyEvent>(MEDIA_CHANNEL);
    let engine_task = tokio::spawn(async move {
        if let Err(e) = engine.run(media_rx, ai_rx).await {
            warn!(error = %e, "engine ended with error");
        }
    });

    let _ = media_tx.send(TelephonyEvent::Connected).await;

    // Inbound pump. The framer re-chunks provider payloads into exact
    // fixed-size frames regardless of how the provider sliced them.
    let mut framer = Framer::new(state.settings.audio.frame_format());
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                debug!(%call_id, error = %e, "socket error");
                break;
            }
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<StreamMessage>(&text) {
                Ok(StreamMessage::Media { media }) => match BASE64.decode(&media.payload) {
                    Ok(bytes) => {
                        for frame in framer.feed(&bytes) {
                            if media_tx.send(TelephonyEvent::Media(frame)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => debug!(%call_id, error = %e, "undecodable media payload"),
                },
                Ok(StreamMessage::Stop {}) => {
                    info!(%call_id, "stream stopped by provider");
                    break;
                }
                Ok(_) => {}
                Err(e) => debug!(%call_id, error = %e, "unparseable stream message"),
            },
            Message::Close(_) => {
                debug!(%call_id, "socket closed");
                break;
            }
            _ => {}
        }
    }

    let _ = media_tx.send(TelephonyEvent::Disconnected).await;
    drop(media_tx);
    let _ = engine_task.await;

    state.registry.remove(&call_id);
    crate::metrics::record_call_duration(session.age().as_secs_f64());
    info!(%call_id, "call handler finished");

    drop(out_tx);
    let _ = writer.await;
}

/// Read until the `start` event arrives
async fn await_start(
    stream: &mut (impl StreamExt<Item = std::result::Result<Message, axum::Error>> + Unpin),
) -> Option<StartMeta> {
    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<StreamMessage>(&text) {
                Ok(StreamMessage::Start { start }) => return Some(start),
                Ok(StreamMessage::Connected {}) => debug!("provider connected"),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "unparseable message before start"),
            },
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Outbound half of the media stream
struct MediaStreamLink {
    outbound: mpsc::Sender<Message>,
    stream_sid: String,
}

impl MediaStreamLink {
    async fn send_json(&self, value: serde_json::Value) -> Result<()> {
        self.outbound
            .send(Message::Text(value.to_string()))
            .await
            .map_err(|_| Error::ChannelClosed("media stream writer".into()))
    }
}

#[async_trait::async_trait]
impl TelephonyLink for MediaStreamLink {
    async fn send_frame(&self, frame: AudioFrame) -> Result<()> {
        self.send_json(json!({
            "event": "media",
            "streamSid": self.stream_sid,
            "media": { "payload": BASE64.encode(&frame.payload) },
        }))
        .await
    }

    /// Drop audio the provider has buffered but not yet played
    async fn clear_buffered_audio(&self) -> Result<()> {
        self.send_json(json!({
            "event": "clear",
            "streamSid": self.stream_sid,
        }))
        .await
    }

    async fn terminate_call(&self, call_id: &str) -> Result<()> {
        info!(%call_id, "closing media stream");
        self.outbound
            .send(Message::Close(None))
            .await
            .map_err(|_| Error::ChannelClosed("media stream writer".into()))
    }
}
