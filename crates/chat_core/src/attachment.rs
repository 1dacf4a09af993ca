//! Attachment capability interface and validation policy.
//!
//! The platform (content resolvers, pickers, bitmap APIs) stays outside this
//! workspace; the session manager only consumes the three operations below
//! plus its own allow-list/size-cap policy.

use async_trait::async_trait;
use thiserror::Error;

/// Upper bound on attachment size: 10 MiB.
pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("unsupported media type: {0}")]
    UnsupportedType(String),

    #[error("invalid attachment size: {0} bytes")]
    InvalidSize(u64),

    #[error("unreadable attachment: {0}")]
    Unreadable(String),
}

/// Resolves a candidate attachment by opaque URI.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    /// Resolved media type, `None` when the platform cannot determine one.
    async fn media_type(&self, uri: &str) -> Option<String>;

    /// Size in bytes, `None` when unknown.
    async fn size(&self, uri: &str) -> Option<u64>;

    /// The full attachment content.
    async fn bytes(&self, uri: &str) -> Result<Vec<u8>, AttachmentError>;
}

/// Allow-list and size cap applied before any network I/O.
#[derive(Debug, Clone)]
pub struct AttachmentPolicy {
    pub allowed_media_types: Vec<String>,
    pub max_size_bytes: u64,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            allowed_media_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            max_size_bytes: MAX_ATTACHMENT_BYTES,
        }
    }
}

impl AttachmentPolicy {
    /// Validate a resolved media type and size. An unresolved media type is
    /// rejected, matching a resolver that reports `application/octet-stream`.
    pub fn check(&self, media_type: Option<&str>, size: u64) -> Result<(), AttachmentError> {
        let media_type = media_type.unwrap_or("application/octet-stream");
        if !self
            .allowed_media_types
            .iter()
            .any(|allowed| allowed == media_type)
        {
            return Err(AttachmentError::UnsupportedType(media_type.to_string()));
        }
        if size == 0 || size > self.max_size_bytes {
            return Err(AttachmentError::InvalidSize(size));
        }
        Ok(())
    }
}

/// Filesystem-backed attachment source; the URI is a plain path and the media
/// type is resolved from the file extension.
#[derive(Debug, Clone, Default)]
pub struct FsAttachmentSource;

fn media_type_for_extension(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[async_trait]
impl AttachmentSource for FsAttachmentSource {
    async fn media_type(&self, uri: &str) -> Option<String> {
        let extension = std::path::Path::new(uri).extension()?.to_str()?;
        media_type_for_extension(extension).map(str::to_string)
    }

    async fn size(&self, uri: &str) -> Option<u64> {
        tokio::fs::metadata(uri).await.ok().map(|meta| meta.len())
    }

    async fn bytes(&self, uri: &str) -> Result<Vec<u8>, AttachmentError> {
        tokio::fs::read(uri)
            .await
            .map_err(|err| AttachmentError::Unreadable(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn policy_accepts_allowed_type_within_cap() {
        let policy = AttachmentPolicy::default();
        assert!(policy.check(Some("image/png"), 1024).is_ok());
    }

    #[test]
    fn policy_rejects_unknown_and_disallowed_types() {
        let policy = AttachmentPolicy::default();
        assert!(matches!(
            policy.check(None, 1024),
            Err(AttachmentError::UnsupportedType(_))
        ));
        assert!(matches!(
            policy.check(Some("application/pdf"), 1024),
            Err(AttachmentError::UnsupportedType(_))
        ));
    }

    #[test]
    fn policy_rejects_empty_and_oversized_attachments() {
        let policy = AttachmentPolicy::default();
        assert!(matches!(
            policy.check(Some("image/jpeg"), 0),
            Err(AttachmentError::InvalidSize(0))
        ));
        assert!(matches!(
            policy.check(Some("image/jpeg"), MAX_ATTACHMENT_BYTES + 1),
            Err(AttachmentError::InvalidSize(_))
        ));
    }

    #[tokio::test]
    async fn fs_source_resolves_type_size_and_bytes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("photo.JPG");
        let mut file = std::fs::File::create(&path).expect("create file");
        file.write_all(b"not really a jpeg").expect("write file");
        let uri = path.to_string_lossy().to_string();

        let source = FsAttachmentSource;
        assert_eq!(source.media_type(&uri).await.as_deref(), Some("image/jpeg"));
        assert_eq!(source.size(&uri).await, Some(17));
        assert_eq!(source.bytes(&uri).await.expect("bytes"), b"not really a jpeg");
    }

    #[tokio::test]
    async fn fs_source_reports_missing_files_as_unreadable() {
        let source = FsAttachmentSource;
        assert!(source.size("/no/such/file.png").await.is_none());
        assert!(matches!(
            source.bytes("/no/such/file.png").await,
            Err(AttachmentError::Unreadable(_))
        ));
    }
}
