//! Error types for the command layer.

use heapscope_core::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The user interrupted the running command; unwinds one command and
    /// clears the script stack.
    #[error("command interrupted")]
    Interrupted,

    /// The command reported its problem to the error sink already; the
    /// runner only needs to know the command did not complete.
    #[error("command aborted")]
    Aborted,

    /// Analysis-layer failure
    #[error("analysis error: {0}")]
    Session(SessionError),
}

impl From<SessionError> for CommandError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Interrupted => CommandError::Interrupted,
            other => CommandError::Session(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CommandError>;
