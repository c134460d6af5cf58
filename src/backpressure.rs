//! Cooperative producer-side backpressure (spec component 4.2).
//!
//! A gate samples a downstream queue's depth and pauses the producer loop
//! while it drains, with hysteresis between the pause and resume
//! thresholds so a queue sitting right at the boundary doesn't flap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info};

use crate::queue::{QueueError, ReliableQueue};

pub struct BackpressureGate<Q: ReliableQueue> {
    queue: Q,
    name: &'static str,
    pause_hi: u64,
    resume_lo: u64,
    check_interval: Duration,
    paused: AtomicBool,
}

impl<Q: ReliableQueue> BackpressureGate<Q> {
    /// `resume_lo` must be `<= pause_hi`; both bound the depth of `queue`.
    /// `name` labels the `backpressure_*_total` counters so `/metrics` can
    /// tell which downstream queue paused.
    pub fn new(queue: Q, name: &'static str, pause_hi: u64, resume_lo: u64, check_interval: Duration) -> Self {
        debug_assert!(resume_lo <= pause_hi, "resume_lo must not exceed pause_hi");
        Self {
            queue,
            name,
            pause_hi,
            resume_lo,
            check_interval,
            paused: AtomicBool::new(false),
        }
    }

    /// Samples the queue depth and blocks (in a loop, resampling every
    /// `check_interval`) while the gate is paused. Returns once depth has
    /// fallen at or below `resume_lo`, or immediately if it was never
    /// paused and depth is below `pause_hi`.
    pub async fn wait_if_needed(&self) -> Result<(), QueueError> {
        loop {
            let depth = self.queue.length().await?;
            let was_paused = self.paused.load(Ordering::SeqCst);

            if !was_paused && depth >= self.pause_hi {
                self.paused.store(true, Ordering::SeqCst);
                counter!("backpressure_pause_total", "queue" => self.name).increment(1);
                info!(depth, pause_hi = self.pause_hi, queue = self.name, "backpressure gate paused");
                tokio::time::sleep(self.check_interval).await;
                continue;
            }

            if was_paused {
                if depth <= self.resume_lo {
                    self.paused.store(false, Ordering::SeqCst);
                    counter!("backpressure_resume_total", "queue" => self.name).increment(1);
                    info!(depth, resume_lo = self.resume_lo, queue = self.name, "backpressure gate resumed");
                    return Ok(());
                }
                debug!(depth, "backpressure gate still paused");
                tokio::time::sleep(self.check_interval).await;
                continue;
            }

            return Ok(());
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn test_gate_passes_through_below_threshold() {
        let q = InMemoryQueue::new(StdDuration::from_secs(30));
        let gate = BackpressureGate::new(q, "test", 10, 2, StdDuration::from_millis(5));
        gate.wait_if_needed().await.unwrap();
        assert!(!gate.is_paused());
    }

    #[tokio::test]
    async fn test_gate_pauses_then_resumes_once_drained() {
        let q = InMemoryQueue::new(StdDuration::from_secs(30));
        for i in 0..5 {
            q.push(&format!("job-{i}"), b"x").await.unwrap();
        }
        let gate = BackpressureGate::new(q.clone(), "test", 5, 1, StdDuration::from_millis(5));

        let gate = std::sync::Arc::new(gate);
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_if_needed().await })
        };

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(gate.is_paused());

        for i in 0..5 {
            let msg = q.pop(StdDuration::from_millis(50)).await.unwrap().unwrap();
            q.ack(&msg).await.unwrap();
            let _ = i;
        }

        waiter.await.unwrap().unwrap();
        assert!(!gate.is_paused());
    }
}
