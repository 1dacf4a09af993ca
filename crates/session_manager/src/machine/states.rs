//! Turn states - the lifecycle of one user turn.

use serde::{Deserialize, Serialize};

/// States a text turn moves through, from acceptance to termination.
///
/// A turn is one user input and its reply, whether streamed from the backend
/// or produced locally by the rule responder.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No turn in flight, awaiting user input.
    Idle,

    /// Input passed the guard; the streaming request is being issued.
    Sending,

    /// The backend accepted the request; fragments are arriving.
    Streaming,

    /// The stream terminated normally; the reply is complete.
    Completed,

    /// The transport failed and the placeholder was replaced by the local
    /// rule reply.
    FailedFallback,

    /// The backend rejected the turn (auth, rate limit, permission). Not
    /// retried; the caller must resolve the rejection externally.
    FailedTerminal,
}

impl TurnState {
    /// A turn is in flight between acceptance and termination.
    pub fn in_flight(&self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::FailedFallback | Self::FailedTerminal
        )
    }
}
