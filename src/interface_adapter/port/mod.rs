pub mod pty_port;

pub use pty_port::{ChildControl, ChildInput, SpawnRequest, SpawnStrategy, SpawnedChild};
