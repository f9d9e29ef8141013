use std::io;

use crate::domain::primitive::StrategyKind;
use crate::interface_adapter::port::{SpawnRequest, SpawnStrategy, SpawnedChild};

use super::piped_child::spawn_piped;

/// Last resort: the shell on plain pipes. Terminal variables are still in the
/// environment, but there is no line discipline, no job control, and resize
/// is only a `SIGWINCH`.
pub struct DirectSpawnStrategy;

/// Shells on pipes assume a script; `-i` keeps them prompting.
pub(crate) fn direct_args(args: &[String]) -> Vec<String> {
    if args.is_empty() && cfg!(unix) {
        vec!["-i".to_string()]
    } else {
        args.to_vec()
    }
}

impl SpawnStrategy for DirectSpawnStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectSpawn
    }

    fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedChild> {
        spawn_piped(&request.program, &direct_args(&request.args), request)
    }
}
