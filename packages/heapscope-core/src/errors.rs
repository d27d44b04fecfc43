//! Error types for heapscope-core
//!
//! Provides unified error handling across the crate.

use thiserror::Error;

/// Main error type for analysis-session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Allocation reports from a finder were out of order or overlapping
    #[error("corrupt allocation directory: {0}")]
    CorruptDirectory(String),

    /// A graph or classification invariant no longer holds
    #[error("corrupt allocation graph: {0}")]
    CorruptGraph(String),

    /// Ill-formed extension rule(s); the offending command is skipped
    #[error("invalid extension rules")]
    InvalidExtensionRules,

    /// Unknown set, signature, or pattern name
    #[error("unknown name: {0}")]
    UnknownName(String),

    /// A long pass observed the interrupt flag
    #[error("command interrupted")]
    Interrupted,
}

impl SessionError {
    pub fn corrupt_directory(msg: impl Into<String>) -> Self {
        SessionError::CorruptDirectory(msg.into())
    }

    pub fn corrupt_graph(msg: impl Into<String>) -> Self {
        SessionError::CorruptGraph(msg.into())
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
