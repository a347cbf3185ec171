//! Presentation Scheduling
//!
//! Paces replicated boards for display. Not deterministic: playback depends
//! on timers and on when gates are finished.
//!
//! - `task`: Completion handles used as wait gates
//! - `scheduler`: The frame-pacing meter

pub mod task;
pub mod scheduler;

pub use task::{Finished, Gate, Task};
pub use scheduler::{Meter, MeterConfig, MeterMode, MeterStatus};
