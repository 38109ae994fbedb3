//! Crate-wide error taxonomy (§7). Leaf errors from each component convert
//! into `DlmError` via `#[from]`/`From` impls so callers can match on
//! `ErrorKind` without caring which component raised it.

use thiserror::Error;

/// The taxonomy named in §7, used both for internal matching (retry vs.
/// fatal) and as the `kind` half of `Observer::on_error`/`Job::last_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ProbeFailed,
    /// Informational, not fatal: the resource doesn't support resume.
    NotResumable,
    TransportRetryable,
    TransportFatal,
    RangeRejected,
    DiskFull,
    WritePermission,
    ContentChanged,
    RefreshFailed,
    ManifestCorrupt,
    DecryptFailed,
    MuxFailed,
    Cancelled,
    SchemaFuture,
    Internal,
}

#[derive(Debug, Error)]
pub enum DlmError {
    #[error("probe failed: {0}")]
    ProbeFailed(String),

    #[error("resource is not resumable")]
    NotResumable,

    #[error("transport error (retryable): {0}")]
    TransportRetryable(String),

    #[error("transport error (fatal, status {status:?}): {message}")]
    TransportFatal {
        status: Option<u32>,
        message: String,
    },

    #[error("server rejected byte range (416)")]
    RangeRejected,

    #[error("disk full writing {path}")]
    DiskFull { path: String },

    #[error("permission denied writing {path}")]
    WritePermission { path: String },

    #[error("remote content changed since last probe: {0}")]
    ContentChanged(String),

    #[error("link refresh failed: {0}")]
    RefreshFailed(String),

    #[error("manifest corrupt: {0}")]
    ManifestCorrupt(String),

    #[error("decryption failed: {0}")]
    DecryptFailed(String),

    #[error("muxer invocation failed: {0}")]
    MuxFailed(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("manifest schema version {found} is newer than supported {supported}")]
    SchemaFuture { found: u32, supported: u32 },

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DlmError::ProbeFailed(_) => ErrorKind::ProbeFailed,
            DlmError::NotResumable => ErrorKind::NotResumable,
            DlmError::TransportRetryable(_) => ErrorKind::TransportRetryable,
            DlmError::TransportFatal { .. } => ErrorKind::TransportFatal,
            DlmError::RangeRejected => ErrorKind::RangeRejected,
            DlmError::DiskFull { .. } => ErrorKind::DiskFull,
            DlmError::WritePermission { .. } => ErrorKind::WritePermission,
            DlmError::ContentChanged(_) => ErrorKind::ContentChanged,
            DlmError::RefreshFailed(_) => ErrorKind::RefreshFailed,
            DlmError::ManifestCorrupt(_) => ErrorKind::ManifestCorrupt,
            DlmError::DecryptFailed(_) => ErrorKind::DecryptFailed,
            DlmError::MuxFailed(_) => ErrorKind::MuxFailed,
            DlmError::Cancelled => ErrorKind::Cancelled,
            DlmError::SchemaFuture { .. } => ErrorKind::SchemaFuture,
            DlmError::Internal(_) | DlmError::Io(_) | DlmError::Json(_) => ErrorKind::Internal,
        }
    }

    /// Whether a worker should retry this error internally (§7 propagation
    /// policy: only `TransportRetryable` is handled inside the worker).
    pub fn is_worker_retryable(&self) -> bool {
        matches!(self, DlmError::TransportRetryable(_))
    }

    /// The triple fed directly to `Observer::on_error`/`Job::last_error`.
    pub fn status_triple(&self) -> (ErrorKind, Option<u32>, String) {
        let status = match self {
            DlmError::TransportFatal { status, .. } => *status,
            _ => None,
        };
        (self.kind(), status, self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DlmError>;
