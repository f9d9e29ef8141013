use serde::{Deserialize, Serialize};

/// How a child process ended. Either field may be absent: a process that exited
/// normally has a code, one killed by a signal has the signal's name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<String>,
}

impl ExitStatus {
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn with_signal(signal: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: Some(signal.into()),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[cfg(unix)]
impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        if let Some(raw) = status.signal() {
            return match super::Signal::from_raw(raw) {
                Some(signal) => Self::with_signal(signal.name()),
                None => Self::with_signal(format!("signal {raw}")),
            };
        }
        Self {
            code: status.code(),
            signal: None,
        }
    }
}

#[cfg(not(unix))]
impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Exited(ExitStatus),
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_exited(&self) -> bool {
        matches!(self, Self::Exited(_))
    }

    pub fn exit_status(&self) -> Option<&ExitStatus> {
        match self {
            Self::Exited(status) => Some(status),
            _ => None,
        }
    }

    pub fn status_text(&self) -> String {
        match self {
            Self::Created => "created".to_string(),
            Self::Running => "running".to_string(),
            Self::Exited(ExitStatus {
                code: Some(code), ..
            }) => format!("exited ({code})"),
            Self::Exited(ExitStatus {
                signal: Some(signal),
                ..
            }) => format!("killed ({signal})"),
            Self::Exited(_) => "exited".to_string(),
        }
    }
}
