use std::path::PathBuf;

use crate::domain::primitive::SessionId;

/// Reasons a shell could not be started. Fatal for the session that hit it.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    #[error("Shell not found or not executable: {shell}")]
    ShellNotFound {
        shell: String,
        #[source]
        source: which::Error,
    },

    #[error("Working directory does not exist: {}", .0.display())]
    InvalidCwd(PathBuf),

    #[error("No usable pty strategy ({tried})")]
    NoViableStrategy { tried: String },

    #[error("Session {0} has already been spawned")]
    NotRestartable(SessionId),
}

#[derive(thiserror::Error, Debug)]
pub enum PtyError {
    #[error("Failed to spawn pty: {0}")]
    Spawn(#[from] SpawnError),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Session already exists: {0}")]
    SessionExists(SessionId),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}
