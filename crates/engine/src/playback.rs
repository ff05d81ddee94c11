//! Bounded playback queue between the framer and the clocked sender
//!
//! One producer (AI event reader) and one consumer (clocked sender) in
//! steady state, plus the barge-in and hangup paths which flush it.
//!
//! Invariants:
//! - enqueue never silently discards a frame: on saturation the producer
//!   awaits space and a capacity warning is raised instead;
//! - frames are only ever discarded in bulk via [`PlaybackQueue::flush`],
//!   which swaps the whole deque under one lock so it is safe against a
//!   concurrent in-flight pop.

use call_bridge_core::{AudioFrame, EngineEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::{broadcast, Notify};

struct Inner {
    frames: VecDeque<AudioFrame>,
    /// Warn once per saturation episode, not per frame
    warned: bool,
}

/// Bounded, backpressured frame queue
pub struct PlaybackQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    warn_depth: usize,
    /// Wakes producers waiting for space
    space: Notify,
    /// Wakes drain-waiters when the queue empties
    empty: Notify,
    events: broadcast::Sender<EngineEvent>,
}

impl PlaybackQueue {
    pub fn new(
        capacity: usize,
        warn_ratio: f32,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let warn_depth = ((capacity as f32) * warn_ratio) as usize;
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                warned: false,
            }),
            capacity,
            warn_depth: warn_depth.max(1),
            space: Notify::new(),
            empty: Notify::new(),
            events,
        }
    }

    /// Enqueue one frame, awaiting space if the queue is full
    pub async fn push(&self, frame: AudioFrame) {
        loop {
            let notified = self.space.notified();
            {
                let mut inner = self.inner.lock();
                if inner.frames.len() < self.capacity {
                    inner.frames.push_back(frame);

                    if inner.frames.len() >= self.warn_depth && !inner.warned {
                        inner.warned = true;
                        let depth = inner.frames.len();
                        drop(inner);
                        // Capacity problem, not a reason to drop audio:
                        // the fix is configuration, so warn loudly once.
                        tracing::warn!(
                            depth,
                            capacity = self.capacity,
                            "playback queue near capacity; producer will backpressure"
                        );
                        let _ = self.events.send(EngineEvent::QueueSaturated {
                            depth,
                            capacity: self.capacity,
                        });
                    }
                    return;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking dequeue for the clocked sender
    pub fn try_pop(&self) -> Option<AudioFrame> {
        let mut inner = self.inner.lock();
        let frame = inner.frames.pop_front();
        if frame.is_some() {
            self.space.notify_one();
            if inner.frames.is_empty() {
                inner.warned = false;
                self.empty.notify_waiters();
            }
        }
        frame
    }

    /// Discard all buffered frames (barge-in / hangup), returning the count
    pub fn flush(&self) -> usize {
        let discarded = {
            let mut inner = self.inner.lock();
            inner.warned = false;
            std::mem::take(&mut inner.frames).len()
        };
        self.space.notify_waiters();
        self.empty.notify_waiters();
        if discarded > 0 {
            tracing::debug!(discarded, "playback queue flushed");
        }
        discarded
    }

    /// Current depth
    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// True when no frames are buffered
    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }

    /// Wait until the queue is empty (farewell drain)
    pub async fn await_empty(&self) {
        loop {
            let notified = self.empty.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn queue(capacity: usize) -> Arc<PlaybackQueue> {
        let (tx, _) = broadcast::channel(64);
        Arc::new(PlaybackQueue::new(capacity, 0.9, tx))
    }

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(vec![0u8; 320], seq)
    }

    #[tokio::test]
    async fn push_pop_preserves_order() {
        let q = queue(16);
        q.push(frame(0)).await;
        q.push(frame(1)).await;
        assert_eq!(q.try_pop().unwrap().sequence, 0);
        assert_eq!(q.try_pop().unwrap().sequence, 1);
        assert!(q.try_pop().is_none());
    }

    #[tokio::test]
    async fn saturated_push_backpressures_until_pop() {
        let q = queue(4);
        for i in 0..4 {
            q.push(frame(i)).await;
        }

        let q2 = q.clone();
        let blocked = tokio::spawn(async move { q2.push(frame(99)).await });

        // Producer must not complete while full
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        assert_eq!(q.try_pop().unwrap().sequence, 0);
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("producer should unblock after pop")
            .unwrap();
        assert_eq!(q.len(), 4);
    }

    #[tokio::test]
    async fn flush_discards_in_bulk_and_unblocks_producer() {
        let q = queue(2);
        q.push(frame(0)).await;
        q.push(frame(1)).await;

        let q2 = q.clone();
        let blocked = tokio::spawn(async move { q2.push(frame(2)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(q.flush(), 2);
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("flush should unblock producer")
            .unwrap();
        // Only the late frame remains
        assert_eq!(q.len(), 1);
        assert_eq!(q.try_pop().unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn await_empty_resolves_after_drain() {
        let q = queue(8);
        q.push(frame(0)).await;

        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.await_empty().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        q.try_pop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("await_empty should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn saturation_emits_capacity_event() {
        let (tx, mut rx) = broadcast::channel(8);
        let q = PlaybackQueue::new(10, 0.5, tx);
        for i in 0..6 {
            q.push(frame(i)).await;
        }
        match rx.try_recv() {
            Ok(EngineEvent::QueueSaturated { depth, capacity }) => {
                assert!(depth >= 5);
                assert_eq!(capacity, 10);
            }
            other => panic!("expected QueueSaturated, got {:?}", other),
        }
        // One warning per episode
        assert!(rx.try_recv().is_err());
    }
}
