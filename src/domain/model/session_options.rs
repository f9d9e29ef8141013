use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::domain::primitive::TerminalSize;

pub const TERM: &str = "xterm-256color";
pub const TERM_PROGRAM: &str = "ptyflow";
const DEFAULT_LANG: &str = "en_US.UTF-8";

/// What a consumer asks for when creating a session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionOptions {
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Layered on top of the inherited process environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

fn default_cols() -> u16 {
    TerminalSize::default().cols
}

fn default_rows() -> u16 {
    TerminalSize::default().rows
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            shell: None,
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

impl SessionOptions {
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    pub fn size(&self) -> TerminalSize {
        TerminalSize::new(self.cols, self.rows)
    }

    /// Explicit shell, else `$SHELL`, else the platform default.
    pub fn resolved_shell(&self) -> String {
        if let Some(shell) = self.shell.as_deref().filter(|s| !s.trim().is_empty()) {
            return shell.to_string();
        }
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_shell)
    }

    /// Explicit cwd, else `$HOME`, else the current directory.
    pub fn resolved_cwd(&self) -> PathBuf {
        if let Some(cwd) = &self.cwd {
            return cwd.clone();
        }
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    /// Build the child environment from `base` (normally the process
    /// environment), the consumer's overrides, and the terminal variables.
    /// The terminal variables always win.
    pub fn build_environment<I>(&self, base: I, size: TerminalSize) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env: BTreeMap<String, String> = base.into_iter().collect();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        env.entry("LANG".to_string())
            .or_insert_with(|| DEFAULT_LANG.to_string());
        env.insert("TERM".to_string(), TERM.to_string());
        env.insert("COLORTERM".to_string(), "truecolor".to_string());
        env.insert("TERM_PROGRAM".to_string(), TERM_PROGRAM.to_string());
        env.insert(
            "TERM_PROGRAM_VERSION".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        env.insert("COLUMNS".to_string(), size.cols.to_string());
        env.insert("LINES".to_string(), size.rows.to_string());
        env
    }
}

#[cfg(windows)]
fn default_shell() -> String {
    std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
}

#[cfg(not(windows))]
fn default_shell() -> String {
    if std::path::Path::new("/bin/bash").exists() {
        "/bin/bash".to_string()
    } else {
        "/bin/sh".to_string()
    }
}
