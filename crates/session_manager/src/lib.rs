//! Session manager for a streaming chat client.
//!
//! Owns the conversation state, turns user input into streaming requests,
//! writes through to the local message store, enforces the stream cap, falls
//! back to the rule responder when the network path fails, and paginates
//! history against a backend that may be unreachable.

mod error;
mod machine;
mod manager;
mod structs;

pub use error::{Result, SessionError};
pub use machine::{TurnEvent, TurnMachine, TurnState, TurnTransition};
pub use manager::{
    SessionManager, ATTACHMENT_FAILURE_REPLY, ATTACHMENT_MARKER, ATTACHMENT_REJECTED_REPLY,
    ATTACHMENT_UNREADABLE_REPLY, AUTH_FAILURE_REPLY, FORBIDDEN_REPLY, MAX_ACTIVE_STREAMS,
    RATE_LIMIT_REPLY,
};
pub use structs::{PageCursor, SessionState, StreamChannel};
