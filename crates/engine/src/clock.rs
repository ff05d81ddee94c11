//! Clocked frame sender
//!
//! Drains the playback queue toward the telephony leg at a strict fixed
//! rate: at most one frame per interval, driven by a monotonic deadline
//! rather than approximate sleeps. A bursty producer can fill seconds of
//! queue; the wire still sees telephone-grade pacing.

use crate::playback::PlaybackQueue;
use call_bridge_core::{Result, TelephonyLink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep_until, Duration, Instant};

/// Fixed-rate sender task
pub struct ClockedSender {
    queue: Arc<PlaybackQueue>,
    link: Arc<dyn TelephonyLink>,
    interval: Duration,
    /// Cleared when the queue runs dry, for the echo-suppression gate
    agent_speaking: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

impl ClockedSender {
    pub fn new(
        queue: Arc<PlaybackQueue>,
        link: Arc<dyn TelephonyLink>,
        interval: Duration,
        agent_speaking: Arc<AtomicBool>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            link,
            interval,
            agent_speaking,
            shutdown,
        }
    }

    /// Run until shutdown. Each cycle: wait for the deadline, transmit at
    /// most one frame, advance the deadline by exactly one interval. An
    /// empty queue transmits nothing and resets the deadline to
    /// now + interval — no burst catch-up, no drift accumulation.
    pub async fn run(mut self) -> Result<()> {
        let mut next_deadline = Instant::now() + self.interval;
        let mut sent: u64 = 0;

        loop {
            tokio::select! {
                res = self.shutdown.changed() => {
                    if res.is_err() || *self.shutdown.borrow() {
                        tracing::debug!(frames_sent = sent, "clocked sender stopping");
                        return Ok(());
                    }
                }
                _ = sleep_until(next_deadline) => {
                    match self.queue.try_pop() {
                        Some(frame) => {
                            self.link.send_frame(frame).await?;
                            sent += 1;
                            next_deadline += self.interval;
                        }
                        None => {
                            // Idle period: the turn's audio is fully on the
                            // wire. Re-anchor the clock so the next burst
                            // starts a fresh cadence instead of replaying
                            // missed deadlines.
                            self.agent_speaking.store(false, Ordering::Release);
                            next_deadline = Instant::now() + self.interval;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use call_bridge_core::{AudioFrame, EngineEvent};
    use parking_lot::Mutex;
    use tokio::sync::broadcast;

    struct RecordingLink {
        sends: Mutex<Vec<(u64, Instant)>>,
    }

    #[async_trait]
    impl TelephonyLink for RecordingLink {
        async fn send_frame(&self, frame: AudioFrame) -> Result<()> {
            self.sends.lock().push((frame.sequence, Instant::now()));
            Ok(())
        }
        async fn clear_buffered_audio(&self) -> Result<()> {
            Ok(())
        }
        async fn terminate_call(&self, _call_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn queue() -> Arc<PlaybackQueue> {
        let (tx, _rx) = broadcast::channel::<EngineEvent>(16);
        Arc::new(PlaybackQueue::new(64, 0.9, tx))
    }

    #[tokio::test(start_paused = true)]
    async fn sends_one_frame_per_interval() {
        let q = queue();
        let link = Arc::new(RecordingLink {
            sends: Mutex::new(Vec::new()),
        });
        let speaking = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = watch::channel(false);

        for i in 0..5u64 {
            q.push(AudioFrame::new(vec![0u8; 320], i)).await;
        }

        let sender = ClockedSender::new(
            q.clone(),
            link.clone(),
            Duration::from_millis(20),
            speaking.clone(),
            stop_rx,
        );
        let handle = tokio::spawn(sender.run());

        // Paused clock auto-advances across the deadlines; all five frames
        // drain plus at least one idle cycle.
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let sends = link.sends.lock();
        assert_eq!(sends.len(), 5, "exactly one transmit per queued frame");

        // Clock monotonicity: consecutive sends exactly one interval apart
        for pair in sends.windows(2) {
            let gap = pair[1].1 - pair[0].1;
            assert_eq!(gap, Duration::from_millis(20));
        }
        // Order preserved
        let seqs: Vec<u64> = sends.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_queue_clears_speaking_and_reanchors() {
        let q = queue();
        let link = Arc::new(RecordingLink {
            sends: Mutex::new(Vec::new()),
        });
        let speaking = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = watch::channel(false);

        let sender = ClockedSender::new(
            q.clone(),
            link.clone(),
            Duration::from_millis(20),
            speaking.clone(),
            stop_rx,
        );
        let handle = tokio::spawn(sender.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!speaking.load(Ordering::Acquire), "idle cycle clears speaking");
        assert!(link.sends.lock().is_empty(), "nothing transmitted while idle");

        // A frame arriving after long idle goes out on the next tick, not
        // as a burst of missed deadlines.
        q.push(AudioFrame::new(vec![0u8; 320], 7)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(link.sends.lock().len(), 1);

        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
