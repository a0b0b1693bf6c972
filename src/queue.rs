//! The two queues sitting between ingress and the cycle engine
//! (SPEC_FULL.md §5): an unbounded command queue (ingress never blocks
//! submitting a command) and a bounded, drop-oldest telemetry queue (one
//! entry per cycle's snapshot, so a slow or absent HTTP poller can never
//! make the supervisor itself back up).

use std::collections::VecDeque;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::command::Command;
use crate::telemetry::TimestampBucket;

pub const TELEMETRY_QUEUE_CAPACITY: usize = 200;

pub fn command_channel() -> (mpsc::UnboundedSender<Command>, mpsc::UnboundedReceiver<Command>) {
    mpsc::unbounded_channel()
}

/// One cycle's worth of telemetry, already bucketed by timestamp.
pub struct TelemetryQueue {
    capacity: usize,
    buckets: Mutex<VecDeque<Vec<TimestampBucket>>>,
}

impl TelemetryQueue {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, buckets: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Push one cycle's snapshot, dropping the oldest entry if the queue is
    /// already at capacity.
    pub async fn push(&self, snapshot: Vec<TimestampBucket>) {
        let mut buckets = self.buckets.lock().await;
        if buckets.len() == self.capacity {
            buckets.pop_front();
        }
        buckets.push_back(snapshot);
    }

    /// Drain every queued snapshot, oldest first.
    pub async fn drain(&self) -> Vec<Vec<TimestampBucket>> {
        let mut buckets = self.buckets.lock().await;
        buckets.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

impl Default for TelemetryQueue {
    fn default() -> Self {
        Self::new(TELEMETRY_QUEUE_CAPACITY)
    }
}
