pub mod session_event;
pub mod session_id;
pub mod session_state;
pub mod signal;
pub mod strategy_kind;
pub mod terminal_size;

pub use session_event::{EventReceiver, EventSender, SessionEvent, SessionEventKind, event_channel};
pub use session_id::SessionId;
pub use session_state::{ExitStatus, SessionState};
pub use signal::{Signal, UnknownSignal};
pub use strategy_kind::{StrategyKind, StrategyPreference};
pub use terminal_size::TerminalSize;
