//! Active call registry
//!
//! Bounded map of live calls keyed by call id. Entries are removed when
//! the media stream closes; a periodic cleanup task is the backstop for
//! handlers that died without unregistering.

use crate::ServerError;
use call_bridge_engine::CallSession;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct CallRegistry {
    calls: RwLock<HashMap<String, Arc<CallSession>>>,
    max_calls: usize,
    /// A call past this age with its hangup gate executed is stale
    stale_after: Duration,
    cleanup_interval: Duration,
}

impl CallRegistry {
    pub fn new(max_calls: usize, max_call_secs: u64, cleanup_interval_secs: u64) -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            max_calls,
            // Grace beyond the watchdog's own backstop
            stale_after: Duration::from_secs(max_call_secs + 120),
            cleanup_interval: Duration::from_secs(cleanup_interval_secs),
        }
    }

    /// Register a call, enforcing the concurrency cap
    pub fn register(&self, session: Arc<CallSession>) -> Result<(), ServerError> {
        let mut calls = self.calls.write();
        if calls.len() >= self.max_calls {
            self.cleanup_internal(&mut calls);
            if calls.len() >= self.max_calls {
                warn!(max_calls = self.max_calls, "call capacity reached");
                return Err(ServerError::Capacity(self.max_calls));
            }
        }
        calls.insert(session.call_id.clone(), session);
        crate::metrics::record_active_calls(calls.len());
        Ok(())
    }

    pub fn remove(&self, call_id: &str) -> Option<Arc<CallSession>> {
        let mut calls = self.calls.write();
        let removed = calls.remove(call_id);
        crate::metrics::record_active_calls(calls.len());
        removed
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.calls.read().get(call_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.calls.read().len()
    }

    /// Snapshot of live calls for the HTTP listing
    pub fn snapshot(&self) -> Vec<CallSummary> {
        self.calls
            .read()
            .values()
            .map(|s| CallSummary {
                call_id: s.call_id.clone(),
                direction: s.direction,
                age_secs: s.age().as_secs(),
                hangup: s.hangup.state(),
            })
            .collect()
    }

    /// Start the periodic cleanup task. Returns the shutdown sender.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(self);
        let interval = registry.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut calls = registry.calls.write();
                        let before = calls.len();
                        registry.cleanup_internal(&mut calls);
                        let after = calls.len();
                        drop(calls);
                        if before != after {
                            info!(removed = before - after, remaining = after, "registry cleanup");
                            crate::metrics::record_active_calls(after);
                        }
                    }
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow() {
                            info!("registry cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    fn cleanup_internal(&self, calls: &mut HashMap<String, Arc<CallSession>>) {
        calls.retain(|call_id, session| {
            let stale =
                session.hangup.is_executed() || session.age() >= self.stale_after;
            if stale {
                warn!(%call_id, age_secs = session.age().as_secs(), "removing stale call");
            }
            !stale
        });
    }
}

/// One row of the call listing
#[derive(Debug, Clone, serde::Serialize)]
pub struct CallSummary {
    pub call_id: String,
    pub direction: call_bridge_core::CallDirection,
    pub age_secs: u64,
    pub hangup: call_bridge_core::HangupState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use call_bridge_core::CallDirection;

    fn registry(max: usize) -> Arc<CallRegistry> {
        Arc::new(CallRegistry::new(max, 1800, 60))
    }

    #[test]
    fn register_and_remove() {
        let reg = registry(10);
        let session = CallSession::new("CA1", CallDirection::Inbound);
        reg.register(session).unwrap();
        assert_eq!(reg.count(), 1);
        assert!(reg.get("CA1").is_some());
        assert!(reg.remove("CA1").is_some());
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn capacity_is_enforced() {
        let reg = registry(2);
        reg.register(CallSession::new("CA1", CallDirection::Inbound))
            .unwrap();
        reg.register(CallSession::new("CA2", CallDirection::Inbound))
            .unwrap();
        let err = reg
            .register(CallSession::new("CA3", CallDirection::Inbound))
            .unwrap_err();
        assert!(matches!(err, ServerError::Capacity(2)));
    }

    #[test]
    fn executed_hangups_free_capacity() {
        let reg = registry(1);
        let done = CallSession::new("CA1", CallDirection::Inbound);
        done.hangup.mark_pending();
        assert!(done.hangup.try_execute());
        reg.register(done).unwrap();

        // Full, but the only occupant is finished
        reg.register(CallSession::new("CA2", CallDirection::Inbound))
            .unwrap();
        assert!(reg.get("CA1").is_none());
        assert!(reg.get("CA2").is_some());
    }
}
