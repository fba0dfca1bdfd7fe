//! Staged parallel processing
//!
//! A [`Stage`] is an ordered chain of steps, each running on its own OS
//! threads and connected by bounded crossbeam channels:
//! - the first step is a producer feeding batches in;
//! - a step may run several processors; their output still leaves in
//!   upstream order (ticket order), so ordering contracts survive parallelism;
//! - a failure or panic anywhere sets the shared halt flag in
//!   [`StageControl`]; every blocking wait polls that flag, so no thread can
//!   hang on a dead neighbour;
//! - stages run one at a time, `execute` joins all threads before returning.

mod control;
mod monitor;
mod stage;
mod step;

pub use control::StageControl;
pub use monitor::{
    ExecutionMonitor, ImportProgress, LoggingExecutionMonitor, ProgressCallback, ProgressExecutionMonitor,
    SilentExecutionMonitor, StageProgress, StepProgress,
};
pub use stage::{Pipe, Stage};
pub use step::{BatchSender, FnStep, Step, StepState, StepStats};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long blocking waits sleep between halt checks
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Sizing of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Items per batch handed from step to step
    pub batch_size: usize,
    /// Batches buffered between two steps
    pub max_queue_size: usize,
    /// Upper bound on processors of any one step
    pub max_processors: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            max_queue_size: 10,
            max_processors: std::thread::available_parallelism().map_or(4, |n| n.get()),
        }
    }
}

impl StageConfig {
    /// Same sizing with a different batch size
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            ..self
        }
    }
}
