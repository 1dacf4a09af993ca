//! Turn events - triggers for state transitions.

use std::fmt;

/// Events driving the turn state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// A user input passed the guard and the placeholder was appended.
    TurnStarted,

    /// The streaming response returned 2xx and body consumption began.
    StreamOpened,

    /// The stream ended: `[DONE]`, body exhaustion, or a mid-stream read
    /// error after content had started arriving.
    StreamCompleted,

    /// The request failed at the transport level before a body opened.
    TransportFailed,

    /// HTTP 401.
    AuthRejected,

    /// HTTP 429.
    RateLimited,

    /// In-band `forbidden` sentinel.
    PermissionDenied,

    /// The turn's handle was cancelled: superseded by a new turn, a
    /// conversation switch, or a clear.
    Cancelled,
}

impl fmt::Display for TurnEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TurnStarted => "turn_started",
            Self::StreamOpened => "stream_opened",
            Self::StreamCompleted => "stream_completed",
            Self::TransportFailed => "transport_failed",
            Self::AuthRejected => "auth_rejected",
            Self::RateLimited => "rate_limited",
            Self::PermissionDenied => "permission_denied",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
