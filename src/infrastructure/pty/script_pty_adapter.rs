use std::io;
use std::path::PathBuf;

use crate::domain::primitive::StrategyKind;
use crate::interface_adapter::port::{SpawnRequest, SpawnStrategy, SpawnedChild};

use super::piped_child::spawn_piped;

/// Which `script` command-line dialect the host ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    /// util-linux: `script -q -f -e -c CMD /dev/null`
    UtilLinux,
    /// macOS: `script -q -F /dev/null CMD ARGS...`
    Darwin,
    /// Other BSDs: `script -q /dev/null CMD ARGS...`
    Bsd,
}

/// Lets the system `script` utility allocate the pty and relays through its
/// stdio. Resize is limited to `SIGWINCH` on the wrapper.
pub struct ScriptPtyStrategy {
    script: PathBuf,
    flavor: ScriptFlavor,
}

impl ScriptPtyStrategy {
    pub fn new(script: PathBuf, flavor: ScriptFlavor) -> Self {
        Self { script, flavor }
    }
}

/// Arguments for `script` that run `program args` on a fresh pty and discard
/// the typescript.
pub(crate) fn script_args(
    flavor: ScriptFlavor,
    program: &str,
    args: &[String],
) -> io::Result<Vec<String>> {
    match flavor {
        ScriptFlavor::UtilLinux => {
            let words = std::iter::once(program).chain(args.iter().map(String::as_str));
            let command = shlex::try_join(words)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
            Ok(vec![
                "-q".to_string(),
                "-f".to_string(),
                "-e".to_string(),
                "-c".to_string(),
                command,
                "/dev/null".to_string(),
            ])
        }
        ScriptFlavor::Darwin | ScriptFlavor::Bsd => {
            let mut argv = vec!["-q".to_string()];
            if flavor == ScriptFlavor::Darwin {
                argv.push("-F".to_string());
            }
            argv.push("/dev/null".to_string());
            argv.push(program.to_string());
            argv.extend(args.iter().cloned());
            Ok(argv)
        }
    }
}

impl SpawnStrategy for ScriptPtyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ScriptWrapper
    }

    fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedChild> {
        let program = request.program.to_str().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "shell path is not valid UTF-8")
        })?;
        let argv = script_args(self.flavor, program, &request.args)?;
        spawn_piped(&self.script, &argv, request)
    }
}
