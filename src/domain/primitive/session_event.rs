use tokio::sync::mpsc;

use super::{ExitStatus, SessionId};

/// Something a session reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub id: SessionId,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    /// Batched child output, in production order.
    Data(Vec<u8>),
    /// Terminal event; emitted exactly once per session, after all data.
    Exit(ExitStatus),
    /// Non-fatal I/O failure. The session keeps running.
    Error(String),
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
