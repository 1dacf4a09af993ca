//! HTTP transport for the chat backend.
//!
//! Two kinds of traffic share one client: long-lived streaming turns (text
//! and multimodal) decoded through the newline/`data:` line protocol, and
//! paginated JSON reads for history. The [`ChatBackend`] trait is the seam
//! the session manager consumes; [`HttpBackend`] is the reqwest-backed
//! implementation.

mod client;
mod client_trait;
mod dto;
mod error;
pub mod protocol;
mod stream;

pub use client::HttpBackend;
pub use client_trait::{AttachmentUpload, ChatBackend, EventStream, OpenStream};
pub use error::{TransportError, TransportResult};
pub use protocol::StreamEvent;
pub use stream::StreamHandle;
