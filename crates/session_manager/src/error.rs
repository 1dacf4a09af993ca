//! Session manager error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The session actor has shut down; no further commands can be issued.
    #[error("session actor is no longer running")]
    ActorGone,
}

pub type Result<T> = std::result::Result<T, SessionError>;
