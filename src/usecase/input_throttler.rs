use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::interface_adapter::port::ChildInput;
use crate::shared::config::InputThrottleConfig;

/// Called once per failed backlog with the write error.
pub type WriteErrorHook = Arc<dyn Fn(&io::Error) + Send + Sync>;

/// Longest UTF-8 encoding of one character.
const MAX_CHAR_WIDTH: usize = 4;

fn is_continuation(byte: u8) -> bool {
    byte & 0b1100_0000 == 0b1000_0000
}

/// Where to end a chunk that would nominally end at `end`.
fn chunk_end(bytes: &[u8], start: usize, end: usize) -> usize {
    if end >= bytes.len() || !is_continuation(bytes[end]) {
        return end;
    }
    let floor = start.max(end.saturating_sub(MAX_CHAR_WIDTH - 1));
    match (floor..end).rev().find(|&i| !is_continuation(bytes[i])) {
        // Back up to the start of the straddling character.
        Some(lead) if lead > start => lead,
        // The character alone is wider than the limit: keep it whole.
        Some(_) => {
            let mut end = end;
            while end < bytes.len() && is_continuation(bytes[end]) {
                end += 1;
            }
            end
        }
        // Not UTF-8 here; cut at the limit.
        None => end,
    }
}

/// Split `bytes` into pieces of at most `chunk_size` bytes without cutting a
/// UTF-8 character in two.
pub fn split_chunks(bytes: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(bytes.len() / chunk_size + 1);
    let mut start = 0;
    while start < bytes.len() {
        let end = chunk_end(bytes, start, (start + chunk_size).min(bytes.len()));
        chunks.push(bytes[start..end].to_vec());
        start = end;
    }
    chunks
}

struct ThrottleState {
    pending: VecDeque<Vec<u8>>,
    /// Parked here while no drain task is running.
    input: Option<Box<dyn ChildInput>>,
    on_error: Option<WriteErrorHook>,
    draining: bool,
    closed: bool,
}

/// Paces input into a child's stdin.
///
/// Writes are split into chunks and queued in call order. A single drain task
/// writes them one at a time, sleeping `chunk_interval` between chunks while a
/// backlog remains. The task exits once the queue is empty and the next
/// [`enqueue`](InputThrottler::enqueue) starts a new one.
///
/// Input queued before [`attach`](InputThrottler::attach) is held until a
/// child is attached. Must be used from within a Tokio runtime.
#[derive(Clone)]
pub struct InputThrottler {
    config: InputThrottleConfig,
    state: Arc<Mutex<ThrottleState>>,
}

impl InputThrottler {
    pub fn new(config: InputThrottleConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(ThrottleState {
                pending: VecDeque::new(),
                input: None,
                on_error: None,
                draining: false,
                closed: false,
            })),
        }
    }

    /// Connect the child's stdin and start delivering anything queued so far.
    pub fn attach(&self, input: Box<dyn ChildInput>, on_error: WriteErrorHook) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.input = Some(input);
        state.on_error = Some(on_error);
        self.start_drain(&mut state);
    }

    /// Queue `bytes` for delivery. Returns false if the throttler is closed and
    /// the bytes were dropped.
    pub fn enqueue(&self, bytes: &[u8]) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        if bytes.is_empty() {
            return true;
        }
        state
            .pending
            .extend(split_chunks(bytes, self.config.chunk_size));
        self.start_drain(&mut state);
        true
    }

    /// Drop the backlog and the child's stdin. Later input is discarded.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.clear();
        state.input = None;
        state.on_error = None;
    }

    pub fn pending_chunks(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_draining(&self) -> bool {
        self.state.lock().draining
    }

    fn start_drain(&self, state: &mut ThrottleState) {
        if state.draining || state.pending.is_empty() {
            return;
        }
        let Some(input) = state.input.take() else {
            return;
        };
        state.draining = true;
        tokio::spawn(drain(
            Arc::clone(&self.state),
            input,
            self.config.chunk_interval(),
        ));
    }
}

async fn drain(
    state: Arc<Mutex<ThrottleState>>,
    mut input: Box<dyn ChildInput>,
    interval: Duration,
) {
    loop {
        let chunk = {
            let mut guard = state.lock();
            if guard.closed {
                guard.draining = false;
                return;
            }
            match guard.pending.pop_front() {
                Some(chunk) => chunk,
                None => {
                    guard.input = Some(input);
                    guard.draining = false;
                    return;
                }
            }
        };

        if let Err(e) = input.write_chunk(&chunk).await {
            let hook = {
                let mut guard = state.lock();
                let dropped = guard.pending.len();
                guard.pending.clear();
                tracing::debug!(error = %e, dropped_chunks = dropped, "stdin write failed");
                guard.on_error.clone()
            };
            if let Some(hook) = hook {
                hook(&e);
            }
            continue;
        }

        let more = !state.lock().pending.is_empty();
        if more {
            tokio::time::sleep(interval).await;
        }
    }
}
