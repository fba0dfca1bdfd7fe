//! Error types for the Nexus record store and importer

use std::sync::Arc;
use thiserror::Error;

/// Result type alias using the store Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by record stores, codecs and the import pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from store files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage-related errors (out of range reads, bad headers, ...)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Schema rule bytes that cannot be decoded
    #[error("Malformed schema rule {rule_id} (kind byte {kind}): {message}")]
    MalformedSchemaRule {
        /// Id of the rule being decoded
        rule_id: u64,
        /// Raw kind byte read from the buffer
        kind: i8,
        /// What was wrong with it
        message: String,
    },

    /// A fixed-size payload would be exceeded
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// A record chain is broken or loops
    #[error("Chain error: {0}")]
    Chain(String),

    /// Argument outside of the supported range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Too much bad input was collected
    #[error("Too many bad entries: {collected} collected, tolerance is {tolerance}")]
    TooManyBadEntries {
        /// Number of bad entries seen so far
        collected: u64,
        /// Configured tolerance
        tolerance: u64,
    },

    /// Not enough memory available to run the import at all
    #[error("Insufficient memory: {required} bytes required, {available} bytes available")]
    InsufficientMemory {
        /// Bytes needed for the base caches
        required: u64,
        /// Bytes reported as free
        available: u64,
    },

    /// A step processor panicked
    #[error("Step '{step}' panicked: {message}")]
    StepPanic {
        /// Name of the step
        step: String,
        /// Panic payload rendered as text
        message: String,
    },

    /// A stage was halted because one of its steps failed
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        /// Name of the stage
        stage: String,
        /// First failure recorded in the stage
        #[source]
        source: Arc<Error>,
    },

    /// Work was abandoned because the stage is halting
    #[error("Halted: {0}")]
    Halted(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a malformed schema rule error
    pub fn malformed_rule(rule_id: u64, kind: i8, msg: impl Into<String>) -> Self {
        Self::MalformedSchemaRule {
            rule_id,
            kind,
            message: msg.into(),
        }
    }

    /// Create a capacity error
    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::Capacity(msg.into())
    }

    /// Create a chain error
    pub fn chain(msg: impl Into<String>) -> Self {
        Self::Chain(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a halted error
    pub fn halted(msg: impl Into<String>) -> Self {
        Self::Halted(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the original failure when this error wraps a stage failure
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::StageFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_stage_failures() {
        let inner = Arc::new(Error::capacity("payload full"));
        let outer = Error::StageFailed {
            stage: "Nodes".to_string(),
            source: inner,
        };
        assert!(matches!(outer.root_cause(), Error::Capacity(_)));
        assert!(outer.to_string().contains("Stage 'Nodes' failed"));
    }

    #[test]
    fn test_malformed_rule_message() {
        let err = Error::malformed_rule(7, 42, "unknown kind");
        let text = err.to_string();
        assert!(text.contains("rule 7"));
        assert!(text.contains("kind byte 42"));
    }
}
