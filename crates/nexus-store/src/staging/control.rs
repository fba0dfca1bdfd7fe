use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error};

/// Shared failure and halt state of one stage
///
/// The first recorded error wins; every later failure (typically
/// [`Error::Halted`] from steps noticing the flag) is dropped.
#[derive(Debug)]
pub struct StageControl {
    stage: String,
    halted: AtomicBool,
    first_error: OnceLock<Arc<Error>>,
}

impl StageControl {
    /// Fresh control for the named stage
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            halted: AtomicBool::new(false),
            first_error: OnceLock::new(),
        }
    }

    /// Name of the stage this control belongs to
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Record a failure and halt the stage
    pub fn panic(&self, error: Error) {
        match self.first_error.set(Arc::new(error)) {
            Ok(()) => {
                if let Some(recorded) = self.first_error.get() {
                    error!("Stage '{}' failed: {}", self.stage, recorded);
                }
            }
            Err(ignored) => debug!("Stage '{}' ignoring follow-up failure: {}", self.stage, ignored),
        }
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Whether a failure has been recorded
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Error for work abandoned because of the halt
    pub fn halted_error(&self, step: &str) -> Error {
        Error::halted(format!("step '{}' of stage '{}' stopped", step, self.stage))
    }

    /// `Err(Halted)` once the stage is halting
    pub fn check(&self, step: &str) -> Result<()> {
        if self.is_halted() {
            return Err(self.halted_error(step));
        }
        Ok(())
    }

    /// The first recorded failure, if any
    pub fn failure(&self) -> Option<Arc<Error>> {
        self.first_error.get().cloned()
    }

    /// Surface the first recorded failure as [`Error::StageFailed`]
    pub fn assert_healthy(&self) -> Result<()> {
        match self.first_error.get() {
            Some(source) => Err(Error::StageFailed {
                stage: self.stage.clone(),
                source: Arc::clone(source),
            }),
            None => Ok(()),
        }
    }
}
