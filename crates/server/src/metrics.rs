//! Prometheus metrics
//!
//! Recorder installed once at startup; the `/metrics` endpoint renders
//! the registry. Helpers keep metric names in one place.

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};
use call_bridge_core::{EngineEvent, HangupTrigger};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tokio::sync::broadcast;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Call once before serving.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    register_default_metrics();
    METRICS_HANDLE.get_or_init(|| handle.clone());
    handle
}

fn register_default_metrics() {
    gauge!("call_bridge_calls_active").set(0.0);
    counter!("call_bridge_calls_total").absolute(0);
    counter!("call_bridge_barge_ins_total").absolute(0);
    counter!("call_bridge_barge_ins_confirmed_total").absolute(0);
    counter!("call_bridge_queue_saturation_total").absolute(0);
    counter!("call_bridge_checkins_total").absolute(0);
    for trigger in [
        "audio_done",
        "transcript_race",
        "drain_timeout",
        "silence_timeout",
        "idle_after_greeting",
        "warnings_exhausted",
        "max_duration",
    ] {
        counter!("call_bridge_hangups_total", "trigger" => trigger).absolute(0);
    }
    histogram!("call_bridge_call_duration_seconds").record(0.0);
}

pub fn record_call_started() {
    counter!("call_bridge_calls_total").increment(1);
}

pub fn record_active_calls(count: usize) {
    gauge!("call_bridge_calls_active").set(count as f64);
}

pub fn record_call_duration(secs: f64) {
    histogram!("call_bridge_call_duration_seconds").record(secs);
}

fn trigger_label(trigger: HangupTrigger) -> &'static str {
    match trigger {
        HangupTrigger::AudioDone => "audio_done",
        HangupTrigger::TranscriptRace => "transcript_race",
        HangupTrigger::DrainTimeout => "drain_timeout",
        HangupTrigger::SilenceTimeout => "silence_timeout",
        HangupTrigger::IdleAfterGreeting => "idle_after_greeting",
        HangupTrigger::WarningsExhausted => "warnings_exhausted",
        HangupTrigger::MaxDuration => "max_duration",
    }
}

/// Consume one call's engine events into metrics. Spawned per call;
/// ends when the engine drops its event channel.
pub async fn record_engine_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::BargeInCandidate { .. }) => {
                counter!("call_bridge_barge_ins_total").increment(1);
            }
            Ok(EngineEvent::BargeInConfirmed { .. }) => {
                counter!("call_bridge_barge_ins_confirmed_total").increment(1);
            }
            Ok(EngineEvent::HangupExecuted { trigger, .. }) => {
                counter!("call_bridge_hangups_total", "trigger" => trigger_label(trigger))
                    .increment(1);
            }
            Ok(EngineEvent::QueueSaturated { .. }) => {
                counter!("call_bridge_queue_saturation_total").increment(1);
            }
            Ok(EngineEvent::CheckinRequested { .. }) => {
                counter!("call_bridge_checkins_total").increment(1);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "metrics event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    match METRICS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}
