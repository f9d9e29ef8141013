pub mod session_options;
pub mod session_record;

pub use session_options::SessionOptions;
pub use session_record::{SessionInfo, SessionRecord};
