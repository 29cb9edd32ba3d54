//! Voice session orchestration.

pub mod event;
pub mod manager;
pub mod state;

pub use manager::SessionLifecycleManager;
pub use state::{SessionState, SessionStats, SessionStatus};
