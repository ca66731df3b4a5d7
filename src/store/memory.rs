//! In-memory object store
//!
//! Backs the test suite and `mem://` CLI targets. Listing behaves like a
//! real store: keys come back in lexicographic order, pages are capped at
//! `page_size`, and the continuation cursor is the last key of the
//! previous page (the next page starts strictly after it).

use crate::error::{OpKind, RequestContext, StoreError, StoreResult};
use crate::store::{ListPage, ObjectStore};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;

/// Default listing page size, matching common store limits.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

type BucketMap = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// In-memory `ObjectStore` implementation.
pub struct MemoryStore {
    buckets: RwLock<BucketMap>,
    page_size: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Insert an object, creating the bucket if needed.
    pub async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) {
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body);
    }

    /// Number of objects currently held in a bucket.
    pub async fn len(&self, bucket: &str) -> usize {
        let buckets = self.buckets.read().await;
        buckets.get(bucket).map(|b| b.len()).unwrap_or(0)
    }

    /// Whether a bucket holds no objects.
    pub async fn is_empty(&self, bucket: &str) -> bool {
        self.len(bucket).await == 0
    }

    /// Whether an object exists.
    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        let buckets = self.buckets.read().await;
        buckets.get(bucket).map(|b| b.contains_key(key)).unwrap_or(false)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        cursor: Option<&str>,
    ) -> StoreResult<ListPage> {
        let buckets = self.buckets.read().await;
        let objects = match buckets.get(bucket) {
            Some(objects) => objects,
            // Listing a bucket that was never written is an empty listing,
            // not an error: real stores report an empty page for an
            // unknown prefix.
            None => return Ok(ListPage::default()),
        };

        let lower = match cursor {
            Some(marker) => Bound::Excluded(marker.to_string()),
            None => Bound::Unbounded,
        };

        let mut keys = Vec::with_capacity(self.page_size);
        let mut truncated = false;
        for (key, _) in objects.range((lower, Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                // BTreeMap range runs past the prefix once keys sort
                // beyond it; nothing later can match.
                if key.as_str() > prefix && !keys.is_empty() {
                    break;
                }
                continue;
            }
            if keys.len() == self.page_size {
                truncated = true;
                break;
            }
            keys.push(key.clone());
        }

        Ok(ListPage {
            keys,
            next_cursor: None,
            truncated,
        })
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                ctx: RequestContext::object(bucket, key, OpKind::Fetch),
            })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write().await;
        let removed = buckets.get_mut(bucket).and_then(|b| b.remove(key));
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                ctx: RequestContext::object(bucket, key, OpKind::Delete),
            }),
        }
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()> {
        let mut buckets = self.buckets.write().await;
        let body = buckets
            .get(src_bucket)
            .and_then(|b| b.get(src_key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                ctx: RequestContext::object(src_bucket, src_key, OpKind::Copy),
            })?;
        buckets
            .entry(dst_bucket.to_string())
            .or_default()
            .insert(dst_key.to_string(), body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_fetch_delete() {
        let store = MemoryStore::new();
        store.put("b", "a/1", b"one".to_vec()).await;

        let body = store.fetch_object("b", "a/1").await.unwrap();
        assert_eq!(body, b"one");

        store.delete_object("b", "a/1").await.unwrap();
        let err = store.fetch_object("b", "a/1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.delete_object("b", "nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let store = MemoryStore::with_page_size(2);
        for i in 0..5 {
            store.put("b", &format!("p/{}", i), vec![]).await;
        }
        store.put("b", "other/0", vec![]).await;

        let first = store.list_page("b", "p/", None).await.unwrap();
        assert_eq!(first.keys, vec!["p/0", "p/1"]);
        assert!(first.truncated);

        let second = store.list_page("b", "p/", Some("p/1")).await.unwrap();
        assert_eq!(second.keys, vec!["p/2", "p/3"]);
        assert!(second.truncated);

        let last = store.list_page("b", "p/", Some("p/3")).await.unwrap();
        assert_eq!(last.keys, vec!["p/4"]);
        assert!(!last.truncated);
    }

    #[tokio::test]
    async fn test_list_empty_prefix_matches_everything() {
        let store = MemoryStore::new();
        store.put("b", "x", vec![]).await;
        store.put("b", "y", vec![]).await;

        let page = store.list_page("b", "", None).await.unwrap();
        assert_eq!(page.keys.len(), 2);
        assert!(!page.truncated);
    }

    #[tokio::test]
    async fn test_copy() {
        let store = MemoryStore::new();
        store.put("src", "k", b"body".to_vec()).await;
        store.copy_object("src", "k", "dst", "k2").await.unwrap();
        assert_eq!(store.fetch_object("dst", "k2").await.unwrap(), b"body");
        assert!(store.contains("src", "k").await);
    }
}
