//! Error taxonomy surfaced at the library boundary.
//!
//! Every sentinel the HTTP API and the CLI distinguish is a variant of
//! [`Error`]. Validation errors are raised before any side effect;
//! conflict/state errors carry the offending identifier; transport and
//! storage failures wrap the underlying message.

use std::time::Duration;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Validation
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Conflict / state
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bundle not found: {0}")]
    BundleNotFound(String),
    #[error("bundle is disabled: {0}")]
    BundleDisabled(String),
    #[error("bundle is not empty: {0}")]
    BundleNotEmpty(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("tool is disabled: {0}")]
    ToolDisabled(String),
    #[error("prompt template not found: {0}")]
    TemplateNotFound(String),
    #[error("prompt template is disabled: {0}")]
    TemplateDisabled(String),
    #[error("built-in data is read-only: {0}")]
    BuiltInReadOnly(String),

    // Bounded resources
    #[error("response too large: exceeds {limit} bytes")]
    ResponseTooLarge { limit: u64 },
    #[error("page too large: exceeds {limit} bytes")]
    PageTooLarge { limit: u64 },
    #[error("no content extracted: {0}")]
    NoContentExtracted(String),

    // Attachments
    #[error("attachment modified since this message was sent: {0}")]
    AttachmentModifiedSinceSnapshot(String),
    #[error("attachment already has a content block")]
    ExistingContentBlock,
    #[error("content block is not text: {0}")]
    NonTextContentBlock(String),
    #[error("unreadable file: {0}")]
    UnreadableFile(String),

    // Transport / storage
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("operation cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(String),

    // Invariant breach
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::Conflict(_) => "conflict",
            Error::BundleNotFound(_) => "bundle_not_found",
            Error::BundleDisabled(_) => "bundle_disabled",
            Error::BundleNotEmpty(_) => "bundle_not_empty",
            Error::ToolNotFound(_) => "tool_not_found",
            Error::ToolDisabled(_) => "tool_disabled",
            Error::TemplateNotFound(_) => "template_not_found",
            Error::TemplateDisabled(_) => "template_disabled",
            Error::BuiltInReadOnly(_) => "builtin_read_only",
            Error::ResponseTooLarge { .. } => "response_too_large",
            Error::PageTooLarge { .. } => "page_too_large",
            Error::NoContentExtracted(_) => "no_content_extracted",
            Error::AttachmentModifiedSinceSnapshot(_) => "attachment_modified",
            Error::ExistingContentBlock => "existing_content_block",
            Error::NonTextContentBlock(_) => "non_text_content_block",
            Error::UnreadableFile(_) => "unreadable_file",
            Error::Http(_) | Error::HttpStatus { .. } => "upstream_http",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Database(_) => "database",
            Error::Internal(_) => "internal",
        }
    }

    /// True for the "does not exist" family of sentinels.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::BundleNotFound(_) | Error::ToolNotFound(_) | Error::TemplateNotFound(_)
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidRequest(msg.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::invalid("x").code(), "invalid_request");
        assert_eq!(Error::ResponseTooLarge { limit: 1 }.code(), "response_too_large");
        assert_eq!(Error::ExistingContentBlock.code(), "existing_content_block");
    }

    #[test]
    fn not_found_family() {
        assert!(Error::ToolNotFound("t".into()).is_not_found());
        assert!(Error::BundleNotFound("b".into()).is_not_found());
        assert!(!Error::ToolDisabled("t".into()).is_not_found());
    }

    #[test]
    fn display_includes_limit() {
        let e = Error::PageTooLarge { limit: 16 };
        assert_eq!(e.to_string(), "page too large: exceeds 16 bytes");
    }
}
