//! Response playback: gapless scheduling and interruption.

pub mod interrupt;
pub mod scheduler;

pub use interrupt::{InterruptSource, InterruptionController};
pub use scheduler::{PlaybackScheduler, ScheduledPlayback};
