//! Paginated key enumeration
//!
//! `KeyLister` produces a lazy, finite, forward-only sequence of keys
//! under a bucket prefix: one full traversal per construction, no rewind.
//!
//! The lister is pull-based. A pull with a non-empty page cache delivers
//! the next cached key immediately; otherwise, if the listing is not yet
//! exhausted, it issues exactly one `list_page` call, appends the returned
//! keys to the cache, and retries delivery. `&mut self` on the pull path
//! means at most one page request is ever outstanding.

use crate::error::StoreResult;
use crate::progress::ScanCounter;
use crate::store::ObjectStore;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

/// Paginated key lister over one bucket prefix.
pub struct KeyLister {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    cache: VecDeque<String>,
    cursor: Option<String>,
    done: bool,
    pages: u64,
    listed: ScanCounter,
}

impl KeyLister {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
            cache: VecDeque::new(),
            cursor: None,
            done: false,
            pages: 0,
            listed: ScanCounter::new(),
        }
    }

    /// Counter handle for progress display; counts keys delivered.
    pub fn counter(&self) -> ScanCounter {
        self.listed.clone()
    }

    /// Keys delivered so far.
    pub fn listed(&self) -> u64 {
        self.listed.count()
    }

    /// Keys delivered per second since construction.
    pub fn rate(&self) -> f64 {
        self.listed.rate()
    }

    /// Page fetches issued so far.
    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// Pull the next key. `Ok(None)` signals the end of the listing;
    /// after that every subsequent pull returns `Ok(None)`.
    ///
    /// Errors are final: a listing failure is the store client's to retry,
    /// and a malformed page must never be re-requested from this layer.
    pub async fn next_key(&mut self) -> StoreResult<Option<String>> {
        loop {
            if let Some(key) = self.cache.pop_front() {
                self.listed.increment();
                return Ok(Some(key));
            }

            if self.done {
                return Ok(None);
            }

            let result = self
                .store
                .list_page(&self.bucket, &self.prefix, self.cursor.as_deref())
                .await;
            let page = match result {
                Ok(page) => page,
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            };
            self.pages += 1;

            trace!(
                bucket = %self.bucket,
                prefix = %self.prefix,
                page = self.pages,
                keys = page.keys.len(),
                truncated = page.truncated,
                "fetched listing page"
            );

            if page.truncated && !page.keys.is_empty() {
                // Advance the cursor: prefer a store-supplied token, else
                // continue after the last key of this page.
                self.cursor = match page.next_cursor {
                    Some(token) => Some(token),
                    None => page.keys.last().cloned(),
                };
            } else {
                // Not truncated, or the store reported a truncated-but-empty
                // page; either way there is nothing further to request.
                if page.truncated {
                    debug!(
                        bucket = %self.bucket,
                        prefix = %self.prefix,
                        "truncated empty page, treating listing as complete"
                    );
                }
                self.done = true;
            }

            self.cache.extend(page.keys);
        }
    }

    /// Adapt into a stream of keys for pipeline composition.
    pub fn into_stream(self) -> BoxStream<'static, StoreResult<String>> {
        futures::stream::try_unfold(self, |mut lister| async move {
            match lister.next_key().await? {
                Some(key) => Ok(Some((key, lister))),
                None => Ok(None),
            }
        })
        .boxed()
    }
}
