//src/error.rs

use thiserror::Error;

use crate::types::Stage;

/// Every fatal condition the pipeline can hit. Nothing is retried; the binary
/// logs the error and exits with status 1.
#[derive(Error, Debug)]
pub enum ShovillError {
    /// Invalid or missing command line input, detected before any stage runs.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required external tool is missing or its version is unreadable.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// An external tool exited non-zero or did not produce its declared output.
    #[error("Stage '{stage}' failed: {message}")]
    StageExecution { stage: String, message: String },

    /// A value could not be extracted from a tool's output.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The assembler exited cleanly but no contigs came out.
    #[error("{0}")]
    ZeroOutput(String),

    /// SIGINT or SIGTERM arrived; the running tool was stopped.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// The sequencer was asked to move backwards or re-enter a stage.
    #[error("Invalid stage transition from {from:?} to {to:?}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShovillError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::Dependency(message.into())
    }

    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageExecution {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn zero_output(message: impl Into<String>) -> Self {
        Self::ZeroOutput(message.into())
    }

    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::Interrupted(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ShovillError>;
