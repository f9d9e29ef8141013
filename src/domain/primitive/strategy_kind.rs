use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of ways a session can acquire a terminal for its child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// A real pseudo-terminal pair allocated by the OS.
    NativePty,
    /// The system `script` utility allocates the pty; we talk to it over pipes.
    ScriptWrapper,
    /// Plain pipes with terminal variables in the environment. No job control.
    DirectSpawn,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NativePty => "native_pty",
            Self::ScriptWrapper => "script_wrapper",
            Self::DirectSpawn => "direct_spawn",
        }
    }

    pub fn has_job_control(&self) -> bool {
        !matches!(self, Self::DirectSpawn)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which strategies a session may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPreference {
    /// Try every available strategy, best first.
    #[default]
    Auto,
    NativePty,
    ScriptWrapper,
    DirectSpawn,
}

impl StrategyPreference {
    pub fn forced(&self) -> Option<StrategyKind> {
        match self {
            Self::Auto => None,
            Self::NativePty => Some(StrategyKind::NativePty),
            Self::ScriptWrapper => Some(StrategyKind::ScriptWrapper),
            Self::DirectSpawn => Some(StrategyKind::DirectSpawn),
        }
    }
}

impl FromStr for StrategyPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "auto" => Ok(Self::Auto),
            "native_pty" | "native" => Ok(Self::NativePty),
            "script_wrapper" | "script" => Ok(Self::ScriptWrapper),
            "direct_spawn" | "direct" => Ok(Self::DirectSpawn),
            other => Err(format!(
                "unknown strategy '{other}' (expected auto, native_pty, script_wrapper or direct_spawn)"
            )),
        }
    }
}
