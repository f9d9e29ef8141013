use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::model::{SessionInfo, SessionOptions};
use crate::domain::primitive::{EventSender, SessionId, Signal};
use crate::interface_adapter::port::SpawnStrategy;
use crate::shared::config::FlowControlConfig;
use crate::shared::error::PtyError;

use super::pty_session::PtySession;

/// Sessions keyed by consumer-assigned ids, all reporting on one event
/// channel.
pub struct SessionManager {
    sessions: BTreeMap<SessionId, PtySession>,
    config: FlowControlConfig,
    strategies: Vec<Arc<dyn SpawnStrategy>>,
    events: EventSender,
}

impl SessionManager {
    pub fn new(
        config: FlowControlConfig,
        strategies: Vec<Arc<dyn SpawnStrategy>>,
        events: EventSender,
    ) -> Self {
        Self {
            sessions: BTreeMap::new(),
            config,
            strategies,
            events,
        }
    }

    pub fn create_session(
        &mut self,
        id: SessionId,
        options: SessionOptions,
    ) -> Result<SessionInfo, PtyError> {
        if self.sessions.contains_key(&id) {
            return Err(PtyError::SessionExists(id));
        }
        let session = PtySession::new(
            id.clone(),
            options,
            self.config.clone(),
            self.strategies.clone(),
            self.events.clone(),
        );
        session.spawn()?;
        let info = session.info();
        self.sessions.insert(id, session);
        Ok(info)
    }

    fn session(&self, id: &SessionId) -> Result<&PtySession, PtyError> {
        self.sessions
            .get(id)
            .ok_or_else(|| PtyError::SessionNotFound(id.clone()))
    }

    pub fn get(&self, id: &SessionId) -> Option<&PtySession> {
        self.sessions.get(id)
    }

    pub fn write(&self, id: &SessionId, bytes: &[u8]) -> Result<(), PtyError> {
        self.session(id)?.write(bytes);
        Ok(())
    }

    pub fn resize(&self, id: &SessionId, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.session(id)?.resize(cols, rows);
        Ok(())
    }

    /// `None` sends `SIGTERM`.
    pub fn kill(&self, id: &SessionId, signal: Option<Signal>) -> Result<(), PtyError> {
        self.session(id)?.kill(signal.unwrap_or_default());
        Ok(())
    }

    pub fn acknowledge(&self, id: &SessionId, bytes: usize) -> Result<(), PtyError> {
        self.session(id)?.acknowledge(bytes);
        Ok(())
    }

    /// Forget a session. A child that is still running is hung up.
    pub fn remove(&mut self, id: &SessionId) -> Result<SessionInfo, PtyError> {
        let session = self
            .sessions
            .remove(id)
            .ok_or_else(|| PtyError::SessionNotFound(id.clone()))?;
        Ok(session.info())
    }

    /// Remove every session that has exited and return their ids.
    pub fn prune_exited(&mut self) -> Vec<SessionId> {
        let exited: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.state().is_exited())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &exited {
            self.sessions.remove(id);
        }
        exited
    }

    pub fn kill_all(&self, signal: Signal) {
        for session in self.sessions.values() {
            session.kill(signal);
        }
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions.values().map(PtySession::info).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
