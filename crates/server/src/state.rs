//! Application state shared across handlers

use crate::ai::{AiSessionFactory, LoopbackAiFactory};
use crate::registry::CallRegistry;
use call_bridge_config::Settings;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<CallRegistry>,
    /// Opens the per-call AI realtime session
    pub ai_factory: Arc<dyn AiSessionFactory>,
}

impl AppState {
    /// State with the loopback AI session, for smoke tests and demos
    pub fn new(settings: Settings) -> Self {
        Self::with_ai_factory(settings, Arc::new(LoopbackAiFactory::default()))
    }

    pub fn with_ai_factory(settings: Settings, ai_factory: Arc<dyn AiSessionFactory>) -> Self {
        let registry = Arc::new(CallRegistry::new(
            settings.server.max_calls,
            settings.watchdog.max_call_secs,
            settings.server.cleanup_interval_secs,
        ));
        Self {
            settings: Arc::new(settings),
            registry,
            ai_factory,
        }
    }
}
