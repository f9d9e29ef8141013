mod direct_spawn_adapter;
mod native_pty_adapter;
mod piped_child;
#[cfg(unix)]
mod process_signal;
mod script_pty_adapter;

pub use direct_spawn_adapter::DirectSpawnStrategy;
pub use native_pty_adapter::{NativePtyStrategy, probe_native_pty};
pub use script_pty_adapter::{ScriptFlavor, ScriptPtyStrategy};
