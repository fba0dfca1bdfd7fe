use super::step::{StepState, StepStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Snapshot of a running stage
#[derive(Debug, Clone)]
pub struct StageProgress {
    /// Stage name
    pub stage: String,
    /// Time since the stage started
    pub elapsed: Duration,
    /// Per-step snapshots, upstream first
    pub steps: Vec<StepProgress>,
}

/// Snapshot of one step
#[derive(Debug, Clone)]
pub struct StepProgress {
    /// Step name
    pub name: String,
    /// Lifecycle state
    pub state: StepState,
    /// Batches processed
    pub batches: u64,
    /// Processor threads
    pub processors: usize,
}

impl StageProgress {
    pub(crate) fn snapshot(stage: &str, elapsed: Duration, steps: &[Arc<StepStats>]) -> Self {
        Self {
            stage: stage.to_string(),
            elapsed,
            steps: steps
                .iter()
                .map(|s| StepProgress {
                    name: s.name().to_string(),
                    state: s.state(),
                    batches: s.batches(),
                    processors: s.processors(),
                })
                .collect(),
        }
    }

    /// Batches through the last step
    pub fn batches_done(&self) -> u64 {
        self.steps.last().map_or(0, |s| s.batches)
    }
}

/// Observes stage execution
///
/// All callbacks default to doing nothing.
pub trait ExecutionMonitor: Send + Sync {
    /// How often `check` is called while a stage runs
    fn interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// A stage is about to start
    fn start(&self, _stage: &str) {}

    /// Periodic progress while a stage runs
    fn check(&self, _progress: &StageProgress) {}

    /// A stage finished, successfully or not
    fn end(&self, _stage: &str, _elapsed: Duration) {}

    /// The whole import finished
    fn done(&self, _successful: bool, _total: Duration, _summary: &str) {}
}

/// Monitor that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentExecutionMonitor;

impl ExecutionMonitor for SilentExecutionMonitor {}

/// Monitor that logs stage transitions through `tracing`
#[derive(Debug, Clone)]
pub struct LoggingExecutionMonitor {
    interval: Duration,
}

impl LoggingExecutionMonitor {
    /// Log progress every `interval`
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for LoggingExecutionMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ExecutionMonitor for LoggingExecutionMonitor {
    fn interval(&self) -> Duration {
        self.interval
    }

    fn start(&self, stage: &str) {
        info!("Stage '{}' starting", stage);
    }

    fn check(&self, progress: &StageProgress) {
        let steps: Vec<String> = progress
            .steps
            .iter()
            .map(|s| format!("{}:{}x{}", s.name, s.batches, s.processors))
            .collect();
        debug!(
            "Stage '{}' {:.1}s [{}]",
            progress.stage,
            progress.elapsed.as_secs_f64(),
            steps.join(" | ")
        );
    }

    fn end(&self, stage: &str, elapsed: Duration) {
        info!("Stage '{}' done in {:.3}s", stage, elapsed.as_secs_f64());
    }

    fn done(&self, successful: bool, total: Duration, summary: &str) {
        info!(
            "Import {} after {:.3}s{}{}",
            if successful { "finished" } else { "failed" },
            total.as_secs_f64(),
            if summary.is_empty() { "" } else { "\n" },
            summary
        );
    }
}

/// Progress report handed to a [`ProgressCallback`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProgress {
    /// Stage the report is about
    pub stage: String,
    /// Stages completed before this one
    pub stages_completed: usize,
    /// Batches through the last step of the stage
    pub batches_processed: u64,
    /// Seconds since the stage started
    pub elapsed_seconds: f64,
    /// Whether the stage has ended
    pub stage_finished: bool,
}

/// Import progress callback
pub type ProgressCallback = Box<dyn Fn(ImportProgress) + Send + Sync>;

/// Monitor that forwards progress to a callback
pub struct ProgressExecutionMonitor {
    callback: ProgressCallback,
    interval: Duration,
    stages_completed: AtomicUsize,
}

impl ProgressExecutionMonitor {
    /// Report through `callback` every `interval`
    pub fn new(callback: ProgressCallback, interval: Duration) -> Self {
        Self {
            callback,
            interval,
            stages_completed: AtomicUsize::new(0),
        }
    }

    fn completed(&self) -> usize {
        self.stages_completed.load(Ordering::Relaxed)
    }
}

impl ExecutionMonitor for ProgressExecutionMonitor {
    fn interval(&self) -> Duration {
        self.interval
    }

    fn start(&self, stage: &str) {
        (self.callback)(ImportProgress {
            stage: stage.to_string(),
            stages_completed: self.completed(),
            batches_processed: 0,
            elapsed_seconds: 0.0,
            stage_finished: false,
        });
    }

    fn check(&self, progress: &StageProgress) {
        (self.callback)(ImportProgress {
            stage: progress.stage.clone(),
            stages_completed: self.completed(),
            batches_processed: progress.batches_done(),
            elapsed_seconds: progress.elapsed.as_secs_f64(),
            stage_finished: false,
        });
    }

    fn end(&self, stage: &str, elapsed: Duration) {
        let completed = self.stages_completed.fetch_add(1, Ordering::Relaxed) + 1;
        (self.callback)(ImportProgress {
            stage: stage.to_string(),
            stages_completed: completed,
            batches_processed: 0,
            elapsed_seconds: elapsed.as_secs_f64(),
            stage_finished: true,
        });
    }
}
