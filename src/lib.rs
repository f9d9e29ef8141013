//! Flow-controlled pseudo-terminal sessions.
//!
//! A [`PtySession`](usecase::pty_session::PtySession) owns one child shell,
//! batches its output into `data` events and paces input into its stdin. The
//! terminal itself comes from the first working strategy in the chain built by
//! [`platform_strategy_chain`](interface_adapter::adapter::strategy_factory::platform_strategy_chain).

pub mod domain;
pub mod infrastructure;
pub mod interface_adapter;
pub mod shared;
pub mod usecase;

#[cfg(test)]
mod test_support;
