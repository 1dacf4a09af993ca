//! Session configuration and token access.
//!
//! The source of truth for the backend location, selected defaults and
//! attachment policy is an explicit config value handed to the session
//! manager at construction; the current bearer token is read through an
//! injected accessor so credential storage stays outside this workspace.

use std::sync::Arc;
use std::time::Duration;

use crate::attachment::AttachmentPolicy;

/// Accessor for the current bearer token, if any.
///
/// Implementations must be cheap; the token is read per request.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Fixed token, or none at all. Enough for tests and single-login clients.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn anonymous() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Configuration for one session manager instance.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backend base URL, without a trailing slash.
    pub server_base: String,
    /// Model preselected before the user picks one.
    pub default_model: String,
    /// Page size for `GET /messages/{conversation}`.
    pub message_page_size: u32,
    /// Page size for `GET /conversations`.
    pub conversation_page_size: u32,
    /// Model list served when `GET /models` is unreachable or empty.
    pub fallback_models: Vec<String>,
    pub attachment_policy: AttachmentPolicy,
    /// Applied to paginated JSON fetches only; streaming requests stay open
    /// until the stream ends or is cancelled.
    pub request_timeout: Duration,
}

impl SessionConfig {
    pub fn new(server_base: impl Into<String>) -> Self {
        Self {
            server_base: server_base.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_base: "http://localhost:8080".to_string(),
            default_model: "doubao".to_string(),
            message_page_size: 100,
            conversation_page_size: 50,
            fallback_models: vec![
                "doubao".to_string(),
                "deepseek".to_string(),
                "kimi".to_string(),
            ],
            attachment_policy: AttachmentPolicy::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}
