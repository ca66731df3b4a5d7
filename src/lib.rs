//! bucketscan - Bulk Object-Store Scanner
//!
//! A tool for traversing buckets holding millions of objects: enumerate
//! every key under a prefix and apply a bounded-concurrency operation
//! (fetch, delete, copy) to each, reporting throughput as it goes.
//! Built for migrations, cleanups, audits, and cross-replica
//! consistency checks.
//!
//! # Features
//!
//! - **Paginated enumeration**: pull-based key listing that never holds
//!   more than one page request in flight.
//!
//! - **Bounded concurrency**: a configurable cap on in-flight store
//!   operations plus a bounded output buffer, so a fast listing never
//!   outruns a slow consumer.
//!
//! - **Prefix sharding**: a `{prefix}` placeholder in the scan target
//!   fans the listing out over 256 two-hex-digit shards to dodge
//!   per-partition throttling.
//!
//! - **Replica diffing**: stream two key sets against each other and
//!   count keys present on exactly one side, without materializing
//!   either set.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Object Store                            │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ ObjectStore trait
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  KeyLister ──┐                                                  │
//! │  KeyLister ──┤ ShardedLister (256-way fan-out, fan-in)          │
//! │  KeyLister ──┘        │                                         │
//! │                       ▼                                         │
//! │            merged key stream ────────────┬──────────────┐       │
//! │                       │                  │              │       │
//! │                       ▼                  ▼              ▼       │
//! │              pipeline::process     ReplicaDiffer    (caller)    │
//! │              (get/delete/copy,      (DiffIndex,                 │
//! │               semaphore-bounded)     500ms snapshots)           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # List keys
//! bucketscan keys s3://my-bucket/logs/
//!
//! # Fetch every object, gunzip bodies to stdout
//! bucketscan scan s3://my-bucket/tiles/{prefix}/v2 --gunzip
//!
//! # Dry-run a cleanup
//! bucketscan purge s3://my-bucket/tmp/ --dry-run
//!
//! # Cross-replica consistency check
//! bucketscan compare s3://primary/{prefix} s3://replica/{prefix}
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod keys;
pub mod ops;
pub mod pipeline;
pub mod progress;
pub mod sharded;
pub mod store;

pub use config::{ScanConfig, StoreUrl};
pub use diff::{DiffProgress, DiffReport, ReplicaDiffer};
pub use error::{ConfigError, OpKind, RequestContext, Result, ScanError, StoreError};
pub use keys::KeyLister;
pub use ops::{FetchedObject, GetOptions, KeyTransform};
pub use pipeline::{ErrorMode, ItemOutcome, PipelineItem, PipelineOptions, ProcessedStream};
pub use sharded::{ShardedLister, SHARD_COUNT};
pub use store::{HttpStore, ListPage, MemoryStore, ObjectStore, TransportConfig};

use futures::stream::BoxStream;
use std::sync::Arc;

/// Merged key stream for a scan target, sharded when the prefix carries
/// a `{prefix}` placeholder.
pub fn list_keys(
    store: Arc<dyn ObjectStore>,
    url: &StoreUrl,
    config: &ScanConfig,
) -> BoxStream<'static, error::StoreResult<String>> {
    ShardedLister::stream(store, url, config.shard_concurrency, config.buffer)
}

/// Fetch every object under a scan target.
///
/// Composition of [`list_keys`] and [`ops::get_objects`]; options are
/// validated before any store call.
pub fn scan_objects(
    store: Arc<dyn ObjectStore>,
    url: &StoreUrl,
    options: GetOptions,
    config: &ScanConfig,
) -> std::result::Result<ProcessedStream<FetchedObject>, ConfigError> {
    config.validate()?;
    let keys = list_keys(Arc::clone(&store), url, config);
    ops::get_objects(
        store,
        &url.bucket,
        keys,
        options,
        PipelineOptions {
            concurrency: config.concurrency,
            buffer: config.buffer,
            ..PipelineOptions::default()
        },
    )
}

/// Delete every object under a scan target.
pub fn purge_objects(
    store: Arc<dyn ObjectStore>,
    url: &StoreUrl,
    dry_run: bool,
    config: &ScanConfig,
) -> std::result::Result<ProcessedStream<()>, ConfigError> {
    config.validate()?;
    let keys = list_keys(Arc::clone(&store), url, config);
    Ok(ops::delete_objects(
        store,
        &url.bucket,
        keys,
        dry_run,
        PipelineOptions {
            concurrency: config.concurrency,
            buffer: config.buffer,
            ..PipelineOptions::default()
        },
    ))
}

/// Copy every object under `src` into `dst`'s bucket.
///
/// The destination prefix replaces the source prefix on each key;
/// beyond that, keys are preserved.
pub fn copy_objects(
    store: Arc<dyn ObjectStore>,
    src: &StoreUrl,
    dst: &StoreUrl,
    config: &ScanConfig,
) -> std::result::Result<ProcessedStream<()>, ConfigError> {
    config.validate()?;
    let keys = list_keys(Arc::clone(&store), src, config);

    let transform: Option<KeyTransform> = if src.prefix != dst.prefix {
        let src_prefix = src.prefix.clone();
        let dst_prefix = dst.prefix.clone();
        Some(Arc::new(move |key: &str| {
            match key.strip_prefix(&src_prefix) {
                Some(rest) => format!("{}{}", dst_prefix, rest),
                None => key.to_string(),
            }
        }))
    } else {
        None
    };

    Ok(ops::copy_objects(
        store,
        &src.bucket,
        &dst.bucket,
        keys,
        transform,
        PipelineOptions {
            concurrency: config.concurrency,
            buffer: config.buffer,
            ..PipelineOptions::default()
        },
    ))
}

/// Compare the key sets of two scan targets.
pub fn compare_replicas(
    store: Arc<dyn ObjectStore>,
    primary: &StoreUrl,
    replica: &StoreUrl,
    config: &ScanConfig,
) -> std::result::Result<ReplicaDiffer, ConfigError> {
    config.validate()?;
    let primary_keys = list_keys(Arc::clone(&store), primary, config);
    let replica_keys = list_keys(store, replica, config);
    Ok(ReplicaDiffer::new(primary_keys, replica_keys))
}
