use tokio::time::Instant;

use crate::shared::config::OutputBatchConfig;

/// Coalesces raw child output into bounded batches.
///
/// The batcher holds no timer itself. The owner polls [`deadline`] and calls
/// [`take`] once it has passed, so there is never more than one pending flush.
///
/// [`deadline`]: OutputBatcher::deadline
/// [`take`]: OutputBatcher::take
pub struct OutputBatcher {
    config: OutputBatchConfig,
    pending: Vec<u8>,
    first_byte_at: Option<Instant>,
    deadline: Option<Instant>,
}

impl OutputBatcher {
    pub fn new(config: OutputBatchConfig) -> Self {
        Self {
            pending: Vec::with_capacity(config.flush_threshold),
            config,
            first_byte_at: None,
            deadline: None,
        }
    }

    /// Buffer `chunk`. Returns a batch right away when the threshold is
    /// reached; otherwise pushes the deadline out by the quiet period, capped
    /// at `max_latency` after the first buffered byte.
    pub fn push(&mut self, chunk: &[u8], now: Instant) -> Option<Vec<u8>> {
        if chunk.is_empty() {
            return None;
        }
        let first = *self.first_byte_at.get_or_insert(now);
        self.pending.extend_from_slice(chunk);

        if self.pending.len() >= self.config.flush_threshold {
            return self.take();
        }

        let quiet = now + self.config.quiet_period();
        let cap = first + self.config.max_latency();
        self.deadline = Some(quiet.min(cap));
        None
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Hand out everything buffered and clear the deadline.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        self.deadline = None;
        self.first_byte_at = None;
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.config.flush_threshold),
        ))
    }
}
