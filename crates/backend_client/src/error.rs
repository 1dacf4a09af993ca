use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// 401 from the backend; the caller must re-authenticate.
    #[error("authentication rejected")]
    Unauthorized,

    /// 429 from the backend; not retried here.
    #[error("rate limited")]
    RateLimited,

    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),

    /// Response body did not match the expected schema. Treated as a fetch
    /// failure by callers, never as a partial result.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("stream error: {0}")]
    Stream(String),
}
