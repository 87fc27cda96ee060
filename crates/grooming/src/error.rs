//! Error types for the grooming core.
//!
//! Fallible operations return `GroomResult<T>`. The solver has its own
//! narrower error so per-guide loops can recover from a singular system
//! without unwinding the whole task.

use thiserror::Error;

/// Outcome of a failed constraint projection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    /// The guide cannot be solved at all (too few vertices, zero length).
    #[error("Invalid solver input: {0}")]
    InvalidConfiguration(String),

    /// The constraint system could not be inverted.
    #[error("Constraint system is singular at iteration {iteration}")]
    Singular { iteration: u32 },
}

#[derive(Debug, Error)]
pub enum GroomError {
    /// A segment count, guide length or data shape the core cannot accept.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted frame data is malformed or truncated.
    #[error("Malformed frame data: {0}")]
    Format(String),

    /// The background worker could not be started. The task stays queued.
    #[error("Failed to start guide worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("Unknown brush id {0}")]
    UnknownBrush(u8),

    #[error("Unknown guide {0}")]
    UnknownGuide(usize),
}

impl GroomError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }
}

/// Convenience alias for `Result<T, GroomError>`.
pub type GroomResult<T> = Result<T, GroomError>;
