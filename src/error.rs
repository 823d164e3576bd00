//! Core typed error shared by the store, upload coordinator, and auth layers.
//!
//! Every error that can reach the HTTP boundary carries an OCI error code
//! (spec.md §6) so `api::error` can translate it into the mandated JSON body
//! without re-deriving the code from a string match.

use thiserror::Error;

/// Machine-readable error codes from the OCI Distribution spec error registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OciErrorCode {
    BlobUnknown,
    BlobUploadInvalid,
    BlobUploadUnknown,
    DigestInvalid,
    ManifestBlobUnknown,
    ManifestInvalid,
    ManifestUnknown,
    NameInvalid,
    NameUnknown,
    SizeInvalid,
    Unauthorized,
    Denied,
    Unsupported,
    TooManyRequests,
    RangeInvalid,
}

impl OciErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BlobUnknown => "BLOB_UNKNOWN",
            Self::BlobUploadInvalid => "BLOB_UPLOAD_INVALID",
            Self::BlobUploadUnknown => "BLOB_UPLOAD_UNKNOWN",
            Self::DigestInvalid => "DIGEST_INVALID",
            Self::ManifestBlobUnknown => "MANIFEST_BLOB_UNKNOWN",
            Self::ManifestInvalid => "MANIFEST_INVALID",
            Self::ManifestUnknown => "MANIFEST_UNKNOWN",
            Self::NameInvalid => "NAME_INVALID",
            Self::NameUnknown => "NAME_UNKNOWN",
            Self::SizeInvalid => "SIZE_INVALID",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Denied => "DENIED",
            Self::Unsupported => "UNSUPPORTED",
            Self::TooManyRequests => "TOOMANYREQUESTS",
            Self::RangeInvalid => "RANGE_INVALID",
        }
    }
}

/// Error produced by the store, upload coordinator, or auth layers.
///
/// `message` is safe to return to the client; it must never leak filesystem
/// paths or other operator-only detail.
#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct RegistryError {
    pub code: OciErrorCode,
    pub message: String,
    pub detail: Option<String>,
}

impl RegistryError {
    pub fn new(code: OciErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn blob_unknown(message: impl Into<String>) -> Self {
        Self::new(OciErrorCode::BlobUnknown, message)
    }

    pub fn manifest_unknown(message: impl Into<String>) -> Self {
        Self::new(OciErrorCode::ManifestUnknown, message)
    }

    pub fn digest_invalid(message: impl Into<String>) -> Self {
        Self::new(OciErrorCode::DigestInvalid, message)
    }

    pub fn range_invalid(message: impl Into<String>) -> Self {
        Self::new(OciErrorCode::RangeInvalid, message)
    }

    pub fn name_invalid(message: impl Into<String>) -> Self {
        Self::new(OciErrorCode::NameInvalid, message)
    }

    /// True for errors produced by `io_error` — a transient storage failure
    /// rather than a protocol violation, which the HTTP layer always maps to
    /// 500 regardless of the carried code (spec.md §7).
    pub fn is_io(&self) -> bool {
        self.message == IO_ERROR_MESSAGE
    }
}

const IO_ERROR_MESSAGE: &str = "internal storage error";

/// Wraps a transient I/O failure as the OCI code a given operation surfaces
/// on unexpected filesystem errors (spec.md §7: "yield 500 with BLOB_UNKNOWN
/// or MANIFEST_UNKNOWN as appropriate").
pub fn io_error(code: OciErrorCode, err: std::io::Error) -> RegistryError {
    RegistryError::new(code, IO_ERROR_MESSAGE).with_detail(err.to_string())
}

pub type Result<T> = std::result::Result<T, RegistryError>;
