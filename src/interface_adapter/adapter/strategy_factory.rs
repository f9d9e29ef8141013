use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use crate::domain::primitive::{StrategyKind, StrategyPreference};
use crate::infrastructure::pty::{
    DirectSpawnStrategy, NativePtyStrategy, ScriptFlavor, ScriptPtyStrategy, probe_native_pty,
};
use crate::interface_adapter::port::SpawnStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    MacOs,
    /// FreeBSD, OpenBSD and friends.
    OtherUnix,
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(unix) {
            Self::OtherUnix
        } else if cfg!(windows) {
            Self::Windows
        } else {
            Self::Other
        }
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Self::Linux | Self::MacOs | Self::OtherUnix)
    }

    pub fn script_flavor(&self) -> Option<ScriptFlavor> {
        match self {
            Self::Linux => Some(ScriptFlavor::UtilLinux),
            Self::MacOs => Some(ScriptFlavor::Darwin),
            Self::OtherUnix => Some(ScriptFlavor::Bsd),
            Self::Windows | Self::Other => None,
        }
    }
}

/// What the host can actually do, as far as spawning goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub native_pty: bool,
    /// Location of the `script` utility, if installed.
    pub script: Option<PathBuf>,
}

/// Probe the host once per process. Opens and closes one pty pair and looks
/// `script` up on `PATH`.
pub fn probe_capabilities() -> &'static Capabilities {
    static CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();
    CAPABILITIES.get_or_init(|| {
        let capabilities = Capabilities {
            native_pty: probe_native_pty(),
            script: if Platform::current().is_unix() {
                which::which("script").ok()
            } else {
                None
            },
        };
        tracing::debug!(?capabilities, "probed spawn capabilities");
        capabilities
    })
}

/// Ordered list of strategies worth trying, best first.
pub fn select_strategies(
    platform: Platform,
    capabilities: &Capabilities,
    preference: StrategyPreference,
) -> Vec<StrategyKind> {
    let available = |kind: StrategyKind| match kind {
        StrategyKind::NativePty => capabilities.native_pty,
        StrategyKind::ScriptWrapper => {
            platform.script_flavor().is_some() && capabilities.script.is_some()
        }
        StrategyKind::DirectSpawn => true,
    };

    let candidates = match preference.forced() {
        Some(kind) => vec![kind],
        None => vec![
            StrategyKind::NativePty,
            StrategyKind::ScriptWrapper,
            StrategyKind::DirectSpawn,
        ],
    };
    candidates.into_iter().filter(|kind| available(*kind)).collect()
}

fn build_strategy(
    kind: StrategyKind,
    platform: Platform,
    capabilities: &Capabilities,
) -> Option<Arc<dyn SpawnStrategy>> {
    match kind {
        StrategyKind::NativePty => Some(Arc::new(NativePtyStrategy)),
        StrategyKind::ScriptWrapper => {
            let flavor = platform.script_flavor()?;
            let script = capabilities.script.clone()?;
            Some(Arc::new(ScriptPtyStrategy::new(script, flavor)))
        }
        StrategyKind::DirectSpawn => Some(Arc::new(DirectSpawnStrategy)),
    }
}

/// The strategy chain for this host.
pub fn platform_strategy_chain(preference: StrategyPreference) -> Vec<Arc<dyn SpawnStrategy>> {
    let platform = Platform::current();
    let capabilities = probe_capabilities();
    select_strategies(platform, capabilities, preference)
        .into_iter()
        .filter_map(|kind| build_strategy(kind, platform, capabilities))
        .collect()
}

/// Output of `ptyflow probe`.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub platform: Platform,
    pub capabilities: Capabilities,
    pub preference: StrategyPreference,
    pub chain: Vec<StrategyKind>,
}

pub fn probe_report(preference: StrategyPreference) -> ProbeReport {
    let platform = Platform::current();
    let capabilities = probe_capabilities().clone();
    let chain = select_strategies(platform, &capabilities, preference);
    ProbeReport {
        platform,
        capabilities,
        preference,
        chain,
    }
}
