use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::domain::primitive::{ExitStatus, Signal, StrategyKind, TerminalSize};

/// Fully resolved description of the child to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Complete child environment; nothing else is inherited.
    pub env: BTreeMap<String, String>,
    pub size: TerminalSize,
}

/// Write side of a child's terminal.
#[async_trait]
pub trait ChildInput: Send {
    /// Deliver one chunk in full, or fail.
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;
}

/// Out-of-band control of a running child.
pub trait ChildControl: Send {
    fn pid(&self) -> Option<u32>;

    /// Tell the child about a new window size.
    fn resize(&mut self, size: TerminalSize) -> io::Result<()>;

    /// Deliver `signal` to the child's process group where the platform
    /// allows it. A child that is already gone counts as success.
    fn signal(&mut self, signal: Signal) -> io::Result<()>;
}

/// Everything a strategy hands back for a started child. The session owns all
/// of it; nothing here is shared with another session.
pub struct SpawnedChild {
    pub input: Box<dyn ChildInput>,
    pub control: Box<dyn ChildControl>,
    /// Raw stdout/stderr chunks in production order. Closes once the child's
    /// output side reaches EOF.
    pub output: mpsc::Receiver<Vec<u8>>,
    /// Resolves once the child has been reaped.
    pub exit: oneshot::Receiver<ExitStatus>,
}

/// One way of acquiring a terminal for a child process.
///
/// Implementations must be called from within a Tokio runtime and must not
/// block for longer than it takes to fork the child.
pub trait SpawnStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedChild>;
}
