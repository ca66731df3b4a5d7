//! Store client seam
//!
//! The scanner core never talks to a wire protocol directly; it goes
//! through the `ObjectStore` trait. Implementations own their transport,
//! authentication, and retry/backoff policy for transient failures — the
//! core only classifies and propagates whatever they surface.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   KeyLister / pipeline ops / ShardedLister   │
//! └──────────────────────┬───────────────────────┘
//!                        │ ObjectStore trait
//!            ┌───────────┴───────────┐
//!            ▼                       ▼
//!      ┌───────────┐          ┌─────────────┐
//!      │ HttpStore │          │ MemoryStore │
//!      │ reqwest + │          │ tests and   │
//!      │ retries   │          │ local runs  │
//!      └───────────┘          └─────────────┘
//! ```

pub mod http;
pub mod memory;

use crate::error::StoreResult;
use async_trait::async_trait;

pub use http::{HttpStore, TransportConfig};
pub use memory::MemoryStore;

/// One page of a key listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Keys reported for this page, in store order. May be empty.
    pub keys: Vec<String>,

    /// Continuation token for the next page, if the store supplies one.
    /// When absent and the page is truncated, the cursor is derived from
    /// the last key of the page.
    pub next_cursor: Option<String>,

    /// Whether more pages exist beyond this one.
    pub truncated: bool,
}

/// The external store collaborator.
///
/// Contract notes:
/// - `fetch_object` and `delete_object` report a missing key as
///   `StoreError::NotFound`; callers decide whether that is benign.
/// - Implementations retry transient failures internally; any error
///   returned here is final from the caller's point of view.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one page of keys under `prefix`, continuing from `cursor`.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        cursor: Option<&str>,
    ) -> StoreResult<ListPage>;

    /// Fetch an object body.
    async fn fetch_object(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>>;

    /// Delete an object.
    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// Server-side copy of an object.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()>;
}
