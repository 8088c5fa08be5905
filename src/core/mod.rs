//! Transcodio Core Engine
//!
//! Orchestration core: option validation, hardware encoder probing,
//! encoder process lifecycle, the job state machine, and event delivery.

pub mod config;
pub mod events;
pub mod ffmpeg;
pub mod hwaccel;
pub mod jobs;
pub mod logging;
pub mod options;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
