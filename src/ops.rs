//! Per-key store operations fed to the pipeline
//!
//! Each builder wires a key stream to one store operation through
//! [`crate::pipeline::process`]:
//!
//! - [`get_objects`] — fetch bodies, with optional gunzip, optional
//!   request-context attachment, and optional errors-as-data
//! - [`delete_objects`] — delete keys, idempotent over not-found, with
//!   dry-run support
//! - [`copy_objects`] — server-side copy into another bucket, with an
//!   optional key transform
//!
//! Option combinations are validated here, synchronously, before any
//! store call is made.

use crate::error::{ConfigError, OpKind, RequestContext, ScanError, StoreResult};
use crate::pipeline::{process, ErrorMode, ItemOutcome, PipelineItem, PipelineOptions, ProcessedStream};
use crate::progress::ScanCounter;
use crate::store::ObjectStore;
use flate2::read::GzDecoder;
use futures::stream::BoxStream;
use std::io::Read;
use std::sync::Arc;
use tracing::debug;

/// Maps a source key to its destination key on copy.
pub type KeyTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Output shaping options for [`get_objects`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Emit bare bodies; the consumer wants nothing but bytes.
    pub body_only: bool,
    /// Attach the request context (bucket, key, operation) to each item.
    pub include_request: bool,
    /// Emit per-item errors (benign ones included) as data instead of
    /// aborting.
    pub pass_errors: bool,
    /// Gunzip each fetched body before emitting it.
    pub gunzip: bool,
}

impl GetOptions {
    /// Reject incompatible combinations before any operation starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.body_only && self.include_request {
            return Err(ConfigError::IncompatibleOptions {
                first: "body-only",
                second: "include-request",
            });
        }
        if self.body_only && self.pass_errors {
            return Err(ConfigError::IncompatibleOptions {
                first: "body-only",
                second: "pass-errors",
            });
        }
        Ok(())
    }
}

/// A fetched object.
#[derive(Debug)]
pub struct FetchedObject {
    pub key: String,
    pub body: Vec<u8>,
    /// Present when `GetOptions::include_request` is set.
    pub request: Option<RequestContext>,
}

fn gunzip_body(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::with_capacity(body.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Fetch every key in `keys` at bounded concurrency.
///
/// Not-found is skipped silently unless `pass_errors` asks for it as
/// data. The stats counter counts emitted objects.
pub fn get_objects(
    store: Arc<dyn ObjectStore>,
    bucket: &str,
    keys: BoxStream<'static, StoreResult<String>>,
    options: GetOptions,
    mut pipeline: PipelineOptions,
) -> Result<ProcessedStream<FetchedObject>, ConfigError> {
    options.validate()?;

    if options.pass_errors {
        pipeline.error_mode = ErrorMode::PassThrough;
    }

    let counter = ScanCounter::new();
    let got = counter.clone();
    let bucket = bucket.to_string();

    Ok(process(keys, pipeline, counter, move |key| {
        let store = Arc::clone(&store);
        let bucket = bucket.clone();
        let got = got.clone();
        let options = options.clone();

        async move {
            let ctx = RequestContext::object(&bucket, &key, OpKind::Fetch);

            let body = match store.fetch_object(&bucket, &key).await {
                Ok(body) => body,
                Err(err) if options.pass_errors => {
                    got.increment();
                    return PipelineItem {
                        key,
                        outcome: ItemOutcome::Failed(ScanError::Store(err)),
                    };
                }
                Err(err) if err.is_benign_for(OpKind::Fetch) => {
                    debug!(key = %key, "fetch skipped missing key");
                    return PipelineItem {
                        key,
                        outcome: ItemOutcome::Skipped,
                    };
                }
                Err(err) => {
                    return PipelineItem {
                        key,
                        outcome: ItemOutcome::Failed(ScanError::Store(err)),
                    };
                }
            };

            let body = if options.gunzip {
                match gunzip_body(&body) {
                    Ok(body) => body,
                    Err(e) => {
                        return PipelineItem {
                            key,
                            outcome: ItemOutcome::Failed(ScanError::Gunzip {
                                ctx,
                                reason: e.to_string(),
                            }),
                        };
                    }
                }
            } else {
                body
            };

            got.increment();
            let request = options.include_request.then_some(ctx);
            PipelineItem {
                key: key.clone(),
                outcome: ItemOutcome::Success(FetchedObject { key, body, request }),
            }
        }
    }))
}

/// Delete every key in `keys` at bounded concurrency.
///
/// Deleting an already-missing key is an idempotent skip, counted toward
/// throughput like a real delete. With `dry_run` the store is never
/// called and every key is reported as-if-deleted.
pub fn delete_objects(
    store: Arc<dyn ObjectStore>,
    bucket: &str,
    keys: BoxStream<'static, StoreResult<String>>,
    dry_run: bool,
    mut pipeline: PipelineOptions,
) -> ProcessedStream<()> {
    // Skips are part of the delete story; let consumers see them.
    pipeline.emit_skipped = true;

    let counter = ScanCounter::new();
    let deleted = counter.clone();
    let bucket = bucket.to_string();

    process(keys, pipeline, counter, move |key| {
        let store = Arc::clone(&store);
        let bucket = bucket.clone();
        let deleted = deleted.clone();

        async move {
            if dry_run {
                deleted.increment();
                debug!(key = %key, "dry-run delete");
                return PipelineItem {
                    key,
                    outcome: ItemOutcome::Success(()),
                };
            }

            match store.delete_object(&bucket, &key).await {
                Ok(()) => {
                    deleted.increment();
                    debug!(key = %key, "deleted");
                    PipelineItem {
                        key,
                        outcome: ItemOutcome::Success(()),
                    }
                }
                Err(err) if err.is_benign_for(OpKind::Delete) => {
                    // Someone else already removed it; the goal state holds.
                    deleted.increment();
                    debug!(key = %key, "delete skipped missing key");
                    PipelineItem {
                        key,
                        outcome: ItemOutcome::Skipped,
                    }
                }
                Err(err) => PipelineItem {
                    key,
                    outcome: ItemOutcome::Failed(ScanError::Store(err)),
                },
            }
        }
    })
}

/// Copy every key in `keys` into `dst_bucket` at bounded concurrency.
///
/// `transform` maps each source key to its destination key; identity
/// when absent. Not-found is not benign for copy: a vanished source is a
/// real failure.
pub fn copy_objects(
    store: Arc<dyn ObjectStore>,
    src_bucket: &str,
    dst_bucket: &str,
    keys: BoxStream<'static, StoreResult<String>>,
    transform: Option<KeyTransform>,
    pipeline: PipelineOptions,
) -> ProcessedStream<()> {
    let counter = ScanCounter::new();
    let copied = counter.clone();
    let src_bucket = src_bucket.to_string();
    let dst_bucket = dst_bucket.to_string();

    process(keys, pipeline, counter, move |key| {
        let store = Arc::clone(&store);
        let src_bucket = src_bucket.clone();
        let dst_bucket = dst_bucket.clone();
        let copied = copied.clone();
        let dst_key = match &transform {
            Some(transform) => transform(&key),
            None => key.clone(),
        };

        async move {
            match store
                .copy_object(&src_bucket, &key, &dst_bucket, &dst_key)
                .await
            {
                Ok(()) => {
                    copied.increment();
                    debug!(src = %key, dst = %dst_key, "copied");
                    PipelineItem {
                        key,
                        outcome: ItemOutcome::Success(()),
                    }
                }
                Err(err) => PipelineItem {
                    key,
                    outcome: ItemOutcome::Failed(ScanError::Store(err)),
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use futures::StreamExt;
    use std::io::Write;

    fn keys(keys: &[&str]) -> BoxStream<'static, StoreResult<String>> {
        let owned: Vec<StoreResult<String>> = keys.iter().map(|k| Ok(k.to_string())).collect();
        futures::stream::iter(owned).boxed()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_incompatible_options_rejected_eagerly() {
        let opts = GetOptions {
            body_only: true,
            include_request: true,
            ..GetOptions::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(ConfigError::IncompatibleOptions { .. })
        ));

        let opts = GetOptions {
            body_only: true,
            pass_errors: true,
            ..GetOptions::default()
        };
        assert!(opts.validate().is_err());

        assert!(GetOptions::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_get_fetches_bodies() {
        let store = Arc::new(MemoryStore::new());
        store.put("b", "k1", b"one".to_vec()).await;
        store.put("b", "k2", b"two".to_vec()).await;

        let out = get_objects(
            store,
            "b",
            keys(&["k1", "k2"]),
            GetOptions::default(),
            PipelineOptions::default(),
        )
        .unwrap();

        let mut bodies: Vec<Vec<u8>> = out
            .map(|item| match item.unwrap().outcome {
                ItemOutcome::Success(obj) => obj.body,
                other => panic!("unexpected outcome: {:?}", other),
            })
            .collect()
            .await;
        bodies.sort();
        assert_eq!(bodies, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn test_get_missing_key_is_silent() {
        let store = Arc::new(MemoryStore::new());
        store.put("b", "present", b"x".to_vec()).await;

        let out = get_objects(
            store,
            "b",
            keys(&["present", "missing"]),
            GetOptions::default(),
            PipelineOptions::default(),
        )
        .unwrap();

        let items: Vec<_> = out.collect().await;
        assert_eq!(items.len(), 1, "missing key neither emitted nor an error");
        assert!(items[0].is_ok());
    }

    #[tokio::test]
    async fn test_get_pass_errors_emits_missing_as_data() {
        let store = Arc::new(MemoryStore::new());

        let out = get_objects(
            store,
            "b",
            keys(&["missing"]),
            GetOptions {
                pass_errors: true,
                ..GetOptions::default()
            },
            PipelineOptions::default(),
        )
        .unwrap();

        let items: Vec<_> = out.collect().await;
        assert_eq!(items.len(), 1);
        let item = items.into_iter().next().unwrap().unwrap();
        assert!(matches!(
            item.outcome,
            ItemOutcome::Failed(ScanError::Store(StoreError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_get_gunzip() {
        let store = Arc::new(MemoryStore::new());
        store.put("b", "z", gzip(b"hello world")).await;

        let out = get_objects(
            store,
            "b",
            keys(&["z"]),
            GetOptions {
                gunzip: true,
                ..GetOptions::default()
            },
            PipelineOptions::default(),
        )
        .unwrap();

        let items: Vec<_> = out.collect().await;
        match &items[0].as_ref().unwrap().outcome {
            ItemOutcome::Success(obj) => assert_eq!(obj.body, b"hello world"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_gunzip_failure_is_fatal_with_context() {
        let store = Arc::new(MemoryStore::new());
        store.put("b", "plain", b"not gzipped".to_vec()).await;

        let out = get_objects(
            store,
            "b",
            keys(&["plain"]),
            GetOptions {
                gunzip: true,
                ..GetOptions::default()
            },
            PipelineOptions::default(),
        )
        .unwrap();

        let items: Vec<_> = out.collect().await;
        match items.into_iter().next().unwrap() {
            Err(ScanError::Gunzip { ctx, .. }) => {
                assert_eq!(ctx.bucket, "b");
                assert_eq!(ctx.key.as_deref(), Some("plain"));
                assert_eq!(ctx.op, OpKind::Fetch);
            }
            other => panic!("expected gunzip error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_include_request_context() {
        let store = Arc::new(MemoryStore::new());
        store.put("b", "k", b"x".to_vec()).await;

        let out = get_objects(
            store,
            "b",
            keys(&["k"]),
            GetOptions {
                include_request: true,
                ..GetOptions::default()
            },
            PipelineOptions::default(),
        )
        .unwrap();

        let items: Vec<_> = out.collect().await;
        match &items[0].as_ref().unwrap().outcome {
            ItemOutcome::Success(obj) => {
                let request = obj.request.as_ref().expect("request context attached");
                assert_eq!(request.bucket, "b");
                assert_eq!(request.key.as_deref(), Some("k"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_idempotent_over_missing() {
        let store = Arc::new(MemoryStore::new());
        store.put("b", "k", b"x".to_vec()).await;

        // First run deletes, second run skips benignly.
        for run in 0..2 {
            let out = delete_objects(
                Arc::clone(&store) as Arc<dyn ObjectStore>,
                "b",
                keys(&["k"]),
                false,
                PipelineOptions::default(),
            );
            let items: Vec<_> = out.collect().await;
            assert_eq!(items.len(), 1);
            assert!(items[0].is_ok(), "run {} must not error", run);
        }

        assert!(store.is_empty("b").await);
    }

    #[tokio::test]
    async fn test_delete_dry_run_touches_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.put("b", "k", b"x".to_vec()).await;

        let out = delete_objects(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            "b",
            keys(&["k"]),
            true,
            PipelineOptions::default(),
        );
        let stats = out.stats();
        let items: Vec<_> = out.collect().await;

        assert_eq!(items.len(), 1);
        assert_eq!(stats.count(), 1, "reported as-if-deleted");
        assert!(store.contains("b", "k").await, "object untouched");
    }

    #[tokio::test]
    async fn test_copy_with_transform() {
        let store = Arc::new(MemoryStore::new());
        store.put("src", "data/k", b"x".to_vec()).await;

        let transform: KeyTransform = Arc::new(|key: &str| key.replace("data/", "archive/"));
        let out = copy_objects(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            "src",
            "dst",
            keys(&["data/k"]),
            Some(transform),
            PipelineOptions::default(),
        );
        let items: Vec<_> = out.collect().await;

        assert!(items.iter().all(|i| i.is_ok()));
        assert!(store.contains("dst", "archive/k").await);
    }

    #[tokio::test]
    async fn test_copy_missing_source_is_an_error() {
        let store = Arc::new(MemoryStore::new());

        let out = copy_objects(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            "src",
            "dst",
            keys(&["missing"]),
            None,
            PipelineOptions::default(),
        );
        let items: Vec<_> = out.collect().await;
        assert!(items.iter().any(|i| i.is_err()), "copy not-found is fatal");
    }
}
