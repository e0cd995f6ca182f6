//! Session lifecycle error types.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The request was malformed; rejected before any side effect.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The session ID is unknown. A normal negative result, not logged as
    /// an error.
    #[error("session not found: {0}")]
    NotFound(String),

    /// Every admission slot is in use. Callers must retry after a session
    /// ends; there is no queueing.
    #[error("no free session slot (limit {limit})")]
    ResourceExhausted { limit: usize },

    /// An external tool (git, terminal multiplexer, agent launch) failed.
    #[error("external tool failure: {0}")]
    Tool(#[from] anyhow::Error),
}
