//! Error types for bucketscan
//!
//! This module defines:
//! - `StoreError`, the classified form of every error a store client can
//!   surface, one variant per category
//! - `RequestContext`, the bucket/key/operation annotation attached to
//!   every surfaced error
//! - `ConfigError` for CLI/configuration validation
//! - `ScanError`, the top-level error for the library
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Every store error carries enough context to re-issue the request
//! - Classification is a property of the error, queried by the pipeline
//!   and enumerator rather than re-derived at each call site

use thiserror::Error;

/// The store operation that was being performed when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Paginated key listing
    List,
    /// Object fetch
    Fetch,
    /// Object delete
    Delete,
    /// Object copy
    Copy,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::List => write!(f, "list"),
            OpKind::Fetch => write!(f, "fetch"),
            OpKind::Delete => write!(f, "delete"),
            OpKind::Copy => write!(f, "copy"),
        }
    }
}

/// Request annotation attached to every surfaced store error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Bucket the request targeted
    pub bucket: String,
    /// Key the request targeted; `None` for listing calls
    pub key: Option<String>,
    /// Operation kind
    pub op: OpKind,
}

impl RequestContext {
    pub fn list(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: None,
            op: OpKind::List,
        }
    }

    pub fn object(bucket: impl Into<String>, key: impl Into<String>, op: OpKind) -> Self {
        Self {
            bucket: bucket.into(),
            key: Some(key.into()),
            op,
        }
    }
}

impl std::fmt::Display for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{} {}/{}", self.op, self.bucket, key),
            None => write!(f, "{} {}", self.op, self.bucket),
        }
    }
}

/// Classified store errors.
///
/// The store client maps whatever its transport produces into exactly one
/// of these categories; everything downstream branches on the category,
/// never on transport details.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Object or listing target does not exist. Benign for fetch/delete.
    #[error("not found: {ctx}")]
    NotFound { ctx: RequestContext },

    /// Store asked us to back off. Retried inside the store client only;
    /// if it reaches this layer the client's retries were exhausted.
    #[error("throttled by store: {ctx}")]
    Throttled { ctx: RequestContext },

    /// Request timed out. Same retry ownership as `Throttled`.
    #[error("request timed out: {ctx}")]
    Timeout { ctx: RequestContext },

    /// The store returned a payload missing its expected structure.
    /// Protocol-level, fatal, never retried at this layer.
    #[error("malformed response: {ctx}: {reason}")]
    MalformedResponse { ctx: RequestContext, reason: String },

    /// Authorization failure.
    #[error("access denied: {ctx}")]
    AccessDenied { ctx: RequestContext },

    /// Anything else the client could not classify more precisely.
    #[error("store error: {ctx}: {reason}")]
    Other { ctx: RequestContext, reason: String },
}

impl StoreError {
    /// The request annotation carried by every variant.
    pub fn context(&self) -> &RequestContext {
        match self {
            StoreError::NotFound { ctx }
            | StoreError::Throttled { ctx }
            | StoreError::Timeout { ctx }
            | StoreError::MalformedResponse { ctx, .. }
            | StoreError::AccessDenied { ctx }
            | StoreError::Other { ctx, .. } => ctx,
        }
    }

    /// Not-found is expected on fetch and delete (keys listed earlier may
    /// be gone by the time we act on them) and is excluded from error
    /// reporting for those operations.
    pub fn is_benign_for(&self, op: OpKind) -> bool {
        matches!(self, StoreError::NotFound { .. })
            && matches!(op, OpKind::Fetch | OpKind::Delete)
    }

    /// Transient categories. The store client retries these internally;
    /// by the time one surfaces here it is treated as fatal.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Throttled { .. } | StoreError::Timeout { .. })
    }

    /// Everything that must abort the active pipeline or scan.
    pub fn is_fatal_for(&self, op: OpKind) -> bool {
        !self.is_benign_for(op)
    }
}

/// Configuration and CLI errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse a store URL
    #[error("invalid store url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Invalid concurrency bound
    #[error("invalid concurrency {value}: must be between 1 and {max}")]
    InvalidConcurrency { value: usize, max: usize },

    /// Invalid shard concurrency
    #[error("invalid shard concurrency {value}: must be between 1 and {max}")]
    InvalidShardConcurrency { value: usize, max: usize },

    /// Invalid pipeline buffer size
    #[error("invalid buffer size {value}: must be at least {min}")]
    InvalidBuffer { value: usize, min: usize },

    /// Two options that cannot be combined
    #[error("option '{first}' cannot be used with option '{second}'")]
    IncompatibleOptions {
        first: &'static str,
        second: &'static str,
    },

    /// A required argument was not supplied
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
}

/// Top-level error type for the bucketscan library.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Classified store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Decompression of a fetched body failed. Genuine error, never
    /// benign, reported with the same context as any store failure.
    #[error("gunzip failed: {ctx}: {reason}")]
    Gunzip { ctx: RequestContext, reason: String },

    /// A pipeline channel closed before the work was finished
    #[error("pipeline channel closed unexpectedly")]
    ChannelClosed,
}

/// Result type alias for ScanError
pub type Result<T> = std::result::Result<T, ScanError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(op: OpKind) -> RequestContext {
        RequestContext::object("bucket", "some/key", op)
    }

    #[test]
    fn test_not_found_benign_for_fetch_and_delete() {
        let err = StoreError::NotFound { ctx: ctx(OpKind::Fetch) };
        assert!(err.is_benign_for(OpKind::Fetch));
        assert!(err.is_benign_for(OpKind::Delete));
        assert!(!err.is_benign_for(OpKind::Copy));
        assert!(!err.is_benign_for(OpKind::List));
    }

    #[test]
    fn test_transient_classification() {
        let throttled = StoreError::Throttled { ctx: ctx(OpKind::List) };
        let timeout = StoreError::Timeout { ctx: ctx(OpKind::Fetch) };
        let denied = StoreError::AccessDenied { ctx: ctx(OpKind::Fetch) };
        assert!(throttled.is_transient());
        assert!(timeout.is_transient());
        assert!(!denied.is_transient());
    }

    #[test]
    fn test_malformed_is_fatal_everywhere() {
        let err = StoreError::MalformedResponse {
            ctx: RequestContext::list("bucket"),
            reason: "listing response contained no body".into(),
        };
        assert!(err.is_fatal_for(OpKind::List));
        assert!(err.is_fatal_for(OpKind::Fetch));
        assert!(err.is_fatal_for(OpKind::Delete));
    }

    #[test]
    fn test_context_annotation() {
        let err = StoreError::AccessDenied { ctx: ctx(OpKind::Delete) };
        let ctx = err.context();
        assert_eq!(ctx.bucket, "bucket");
        assert_eq!(ctx.key.as_deref(), Some("some/key"));
        assert_eq!(ctx.op, OpKind::Delete);
        assert!(err.to_string().contains("some/key"));
    }

    #[test]
    fn test_error_conversion() {
        let store_err = StoreError::NotFound { ctx: ctx(OpKind::Fetch) };
        let scan_err: ScanError = store_err.into();
        assert!(matches!(scan_err, ScanError::Store(_)));
    }
}
