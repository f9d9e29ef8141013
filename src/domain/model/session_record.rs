use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::primitive::{ExitStatus, SessionId, SessionState, StrategyKind, TerminalSize};

/// Observable bookkeeping for one session: everything except the child handle.
pub struct SessionRecord {
    id: SessionId,
    shell: String,
    cwd: PathBuf,
    size: TerminalSize,
    state: SessionState,
    strategy: Option<StrategyKind>,
    pid: Option<u32>,
    spawn_attempted: bool,
}

/// Serializable snapshot of a [`SessionRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub pid: Option<u32>,
    pub shell: String,
    pub cwd: PathBuf,
    pub strategy: Option<StrategyKind>,
    pub cols: u16,
    pub rows: u16,
    pub state: String,
}

impl SessionRecord {
    pub fn new(id: SessionId, shell: String, cwd: PathBuf, size: TerminalSize) -> Self {
        Self {
            id,
            shell,
            cwd,
            size,
            state: SessionState::Created,
            strategy: None,
            pid: None,
            spawn_attempted: false,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn size(&self) -> TerminalSize {
        self.size
    }

    pub fn set_size(&mut self, size: TerminalSize) {
        self.size = size;
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn strategy(&self) -> Option<StrategyKind> {
        self.strategy
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Claim the one spawn attempt a session gets. Returns false if it was
    /// already claimed, whether or not that attempt succeeded.
    pub fn begin_spawn(&mut self) -> bool {
        if self.spawn_attempted || !matches!(self.state, SessionState::Created) {
            return false;
        }
        self.spawn_attempted = true;
        true
    }

    pub fn mark_running(&mut self, strategy: StrategyKind, pid: Option<u32>) -> bool {
        if !matches!(self.state, SessionState::Created) {
            return false;
        }
        self.state = SessionState::Running;
        self.strategy = Some(strategy);
        self.pid = pid;
        true
    }

    /// Enter `Exited`. Only the first call wins; later calls return false and
    /// leave the recorded status untouched.
    pub fn mark_exited(&mut self, status: ExitStatus) -> bool {
        if self.state.is_exited() {
            return false;
        }
        self.state = SessionState::Exited(status);
        true
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            pid: self.pid,
            shell: self.shell.clone(),
            cwd: self.cwd.clone(),
            strategy: self.strategy,
            cols: self.size.cols,
            rows: self.size.rows,
            state: self.state.status_text(),
        }
    }
}
