use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::shared::config::AckWatermarks;

/// Consumer-driven output backpressure.
///
/// Counts bytes delivered but not yet acknowledged. Crossing the high
/// watermark pauses the output pump; acknowledging back under the low
/// watermark resumes it. Without watermarks the gate never closes.
pub struct FlowGate {
    watermarks: Option<AckWatermarks>,
    unacked: AtomicUsize,
    paused: AtomicBool,
    resume: Notify,
}

impl FlowGate {
    pub fn new(watermarks: Option<AckWatermarks>) -> Self {
        Self {
            watermarks,
            unacked: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            resume: Notify::new(),
        }
    }

    pub fn record_delivered(&self, bytes: usize) {
        let Some(watermarks) = self.watermarks else {
            return;
        };
        let total = self.unacked.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if total >= watermarks.high_watermark && !self.paused.swap(true, Ordering::SeqCst) {
            tracing::debug!(unacked = total, "output paused");
        }
    }

    pub fn acknowledge(&self, bytes: usize) {
        let Some(watermarks) = self.watermarks else {
            return;
        };
        let previous = self
            .unacked
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(bytes))
            })
            .unwrap_or(0);
        let total = previous.saturating_sub(bytes);
        if total < watermarks.low_watermark && self.paused.swap(false, Ordering::SeqCst) {
            tracing::debug!(unacked = total, "output resumed");
            self.resume.notify_one();
        }
    }

    pub fn unacknowledged(&self) -> usize {
        self.unacked.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Resolves once the gate is open.
    pub async fn wait_resumed(&self) {
        while self.is_paused() {
            self.resume.notified().await;
        }
    }
}
