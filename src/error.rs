//! Error types for the SOCI index pipeline.

use crate::constants::EMPTY_INDEX_MESSAGE;
use crate::event::Violation;
use std::path::PathBuf;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while handling an invocation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Event Errors
    // =========================================================================
    /// Trigger payload failed validation.
    #[error("invalid event: {}", join_violations(.0))]
    InvalidEvent(Vec<Violation>),

    // =========================================================================
    // Workspace/Storage Errors
    // =========================================================================
    /// Workspace directory could not be created.
    #[error("failed to create workspace under {path}: {reason}")]
    WorkspaceCreateFailed { path: PathBuf, reason: String },

    /// Storage initialization failed.
    #[error("failed to initialize storage at {path}: {reason}")]
    StorageInitFailed { path: PathBuf, reason: String },

    /// Blob not found in storage.
    #[error("blob not found: {digest}")]
    BlobNotFound { digest: String },

    /// Storage write failed.
    #[error("failed to write to storage: {0}")]
    StorageWriteFailed(String),

    /// Digest uses an algorithm content cannot be verified with.
    #[error("unsupported digest algorithm in '{digest}'")]
    UnsupportedDigestAlgorithm { digest: String },

    /// Content did not hash to its declared digest.
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    /// Artifacts database could not be read or written.
    #[error("artifacts database error at {path}: {reason}")]
    ArtifactsDb { path: PathBuf, reason: String },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// Failed to parse a registry reference.
    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// Registry authentication failed.
    #[error("failed to authenticate with registry '{registry}': {reason}")]
    RegistryAuthFailed { registry: String, reason: String },

    /// Manifest could not be fetched.
    #[error("failed to fetch manifest '{reference}': {reason}")]
    ManifestFetchFailed { reference: String, reason: String },

    /// Manifest media type is not handled.
    #[error("unsupported manifest media type '{media_type}' for {digest}")]
    UnsupportedMediaType { digest: String, media_type: String },

    /// Image pull failed.
    #[error("failed to pull image '{reference}': {reason}")]
    ImagePullFailed { reference: String, reason: String },

    /// Blob upload failed.
    #[error("failed to push blob {digest}: {reason}")]
    BlobPushFailed { digest: String, reason: String },

    /// Manifest upload failed.
    #[error("failed to push manifest '{reference}': {reason}")]
    ManifestPushFailed { reference: String, reason: String },

    /// Pushed artifact could not be tagged.
    #[error("failed to tag '{reference}': {reason}")]
    TagFailed { reference: String, reason: String },

    // =========================================================================
    // Builder Errors
    // =========================================================================
    /// Every layer was skipped or failed; no zTOC was produced.
    #[error("{}", EMPTY_INDEX_MESSAGE)]
    EmptyIndex,

    /// Single-platform index build failed.
    #[error("failed to build SOCI index: {0}")]
    BuildFailed(String),

    /// Multi-platform conversion failed.
    #[error("failed to convert OCI index: {0}")]
    ConvertFailed(String),

    /// Build reported success but no index record is discoverable.
    #[error("no SOCI indices found in OCI store for {image}")]
    NoIndexRecords { image: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error is the builder's empty-index condition.
    ///
    /// Matches the typed variant as well as the bare message, which older
    /// builders report as plain text.
    pub fn is_empty_index(&self) -> bool {
        match self {
            Self::EmptyIndex => true,
            Self::BuildFailed(reason) | Self::ConvertFailed(reason) => {
                reason.trim() == EMPTY_INDEX_MESSAGE
            }
            _ => false,
        }
    }

    /// Returns true if the invoking host should retry after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidEvent(_))
    }
}

impl From<Vec<Violation>> for Error {
    fn from(violations: Vec<Violation>) -> Self {
        Self::InvalidEvent(violations)
    }
}

impl From<Violation> for Error {
    fn from(violation: Violation) -> Self {
        Self::InvalidEvent(vec![violation])
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
