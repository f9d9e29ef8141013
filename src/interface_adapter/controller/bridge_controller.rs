use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::model::{SessionInfo, SessionOptions};
use crate::domain::primitive::{SessionEvent, SessionEventKind, SessionId, Signal, TerminalSize};
use crate::usecase::session_manager::SessionManager;

fn default_cols() -> u16 {
    TerminalSize::default().cols
}

fn default_rows() -> u16 {
    TerminalSize::default().rows
}

/// One line of input on the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    Create {
        id: SessionId,
        #[serde(default)]
        shell: Option<String>,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default = "default_cols")]
        cols: u16,
        #[serde(default = "default_rows")]
        rows: u16,
    },
    Write {
        id: SessionId,
        data: String,
    },
    Resize {
        id: SessionId,
        cols: u16,
        rows: u16,
    },
    Kill {
        id: SessionId,
        #[serde(default)]
        signal: Option<Signal>,
    },
    Ack {
        id: SessionId,
        bytes: usize,
    },
    List,
}

/// One line of output on the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    Created {
        session: SessionInfo,
    },
    Data {
        id: SessionId,
        data: String,
    },
    Exit {
        id: SessionId,
        code: Option<i32>,
        signal: Option<String>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<SessionId>,
        message: String,
    },
    Sessions {
        sessions: Vec<SessionInfo>,
    },
}

impl BridgeMessage {
    fn error(id: Option<SessionId>, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            message: message.into(),
        }
    }
}

/// Incremental UTF-8 decoder. A multi-byte sequence split across two output
/// batches is held back until it is complete; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Incomplete sequence at the end: wait for more.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        text
    }

    /// Flush whatever is held back, lossily.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Maps bridge commands onto a [`SessionManager`] and session events onto
/// bridge messages.
pub struct BridgeController {
    manager: SessionManager,
    carries: HashMap<SessionId, Utf8Carry>,
}

impl BridgeController {
    pub fn new(manager: SessionManager) -> Self {
        Self {
            manager,
            carries: HashMap::new(),
        }
    }

    /// Whether every session has exited and been reported.
    pub fn is_idle(&self) -> bool {
        self.manager.is_empty()
    }

    pub fn handle_line(&mut self, line: &str) -> Vec<BridgeMessage> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<BridgeCommand>(line) {
            Ok(command) => self.handle_command(command).into_iter().collect(),
            Err(e) => {
                tracing::debug!(error = %e, "malformed bridge command");
                vec![BridgeMessage::error(None, format!("invalid command: {e}"))]
            }
        }
    }

    pub fn handle_command(&mut self, command: BridgeCommand) -> Option<BridgeMessage> {
        let result = match command {
            BridgeCommand::Create {
                id,
                shell,
                args,
                cwd,
                env,
                cols,
                rows,
            } => {
                let options = SessionOptions {
                    shell,
                    args,
                    cwd,
                    env,
                    cols,
                    rows,
                };
                return Some(match self.manager.create_session(id.clone(), options) {
                    Ok(session) => BridgeMessage::Created { session },
                    Err(e) => BridgeMessage::error(Some(id), e.to_string()),
                });
            }
            BridgeCommand::Write { id, data } => {
                self.manager.write(&id, data.as_bytes()).map_err(|e| (id, e))
            }
            BridgeCommand::Resize { id, cols, rows } => {
                self.manager.resize(&id, cols, rows).map_err(|e| (id, e))
            }
            BridgeCommand::Kill { id, signal } => {
                self.manager.kill(&id, signal).map_err(|e| (id, e))
            }
            BridgeCommand::Ack { id, bytes } => {
                self.manager.acknowledge(&id, bytes).map_err(|e| (id, e))
            }
            BridgeCommand::List => {
                return Some(BridgeMessage::Sessions {
                    sessions: self.manager.list(),
                });
            }
        };
        result
            .err()
            .map(|(id, e)| BridgeMessage::error(Some(id), e.to_string()))
    }

    /// Translate a session event. Exited sessions are forgotten once their
    /// exit message has been produced.
    pub fn handle_event(&mut self, event: SessionEvent) -> Vec<BridgeMessage> {
        let SessionEvent { id, kind } = event;
        match kind {
            SessionEventKind::Data(bytes) => {
                let data = self.carries.entry(id.clone()).or_default().decode(&bytes);
                if data.is_empty() {
                    Vec::new()
                } else {
                    vec![BridgeMessage::Data { id, data }]
                }
            }
            SessionEventKind::Error(message) => vec![BridgeMessage::error(Some(id), message)],
            SessionEventKind::Exit(status) => {
                let mut messages = Vec::with_capacity(2);
                if let Some(mut carry) = self.carries.remove(&id) {
                    let data = carry.finish();
                    if !data.is_empty() {
                        messages.push(BridgeMessage::Data {
                            id: id.clone(),
                            data,
                        });
                    }
                }
                let _ = self.manager.remove(&id);
                messages.push(BridgeMessage::Exit {
                    id,
                    code: status.code,
                    signal: status.signal,
                });
                messages
            }
        }
    }

    /// Input is gone: ask every session to end.
    pub fn shutdown(&mut self) {
        tracing::info!(sessions = self.manager.len(), "bridge input closed, ending sessions");
        self.manager.kill_all(Signal::Term);
    }
}
