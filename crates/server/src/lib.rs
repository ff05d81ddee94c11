//! Call bridge server
//!
//! WebSocket media-stream endpoint, active-call registry, and the HTTP
//! observability surface.

pub mod ai;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod state;
pub mod websocket;

pub use ai::{AiSessionFactory, LoopbackAiFactory};
pub use http::create_router;
pub use metrics::init_metrics;
pub use registry::{CallRegistry, CallSummary};
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("call capacity reached ({0} concurrent calls)")]
    Capacity(usize),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("internal error: {0}")]
    Internal(String),
}
