pub mod flow_gate;
pub mod input_throttler;
pub mod output_batcher;
pub mod pty_session;
pub mod session_manager;
