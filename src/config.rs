//! Configuration types for bucketscan
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Store URL parsing (`scheme://bucket/prefix`)
//! - Runtime configuration with validation

use crate::error::ConfigError;
use clap::{Parser, Subcommand};
use regex::Regex;
use std::sync::LazyLock;

/// Maximum reasonable per-pipeline concurrency
const MAX_CONCURRENCY: usize = 4096;

/// At most all 256 shards draining at once
const MAX_SHARD_CONCURRENCY: usize = 256;

/// Minimum pipeline buffer size
const MIN_BUFFER: usize = 16;

/// Placeholder token in a prefix that triggers sharded scanning
pub const PREFIX_PLACEHOLDER: &str = "{prefix}";

/// Regex for parsing store URLs of the form scheme://bucket/prefix
static STORE_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z][a-z0-9+]*)://([^/\s]+)(?:/(.*))?$").expect("Invalid store URL regex")
});

/// Bulk object-store scanner
#[derive(Parser, Debug, Clone)]
#[command(
    name = "bucketscan",
    version,
    about = "Bulk object-store scanner: enumerate, fetch, purge, copy, and compare bucket prefixes",
    long_about = "Enumerates every key under a bucket prefix and applies a bounded-concurrency\n\
                  operation (fetch, delete, copy) to each, reporting throughput as it goes.\n\n\
                  A prefix containing the {prefix} placeholder is expanded into 256 two-hex-digit\n\
                  shards which are listed in parallel to avoid hot-partition throttling.",
    after_help = "EXAMPLES:\n    \
        bucketscan keys s3://my-bucket/logs/\n    \
        bucketscan scan s3://my-bucket/tiles/{prefix}/v2 --gunzip > bodies.bin\n    \
        bucketscan purge s3://my-bucket/tmp/ --dry-run\n    \
        bucketscan copy s3://src-bucket/data/ s3://dst-bucket/data/\n    \
        bucketscan compare s3://primary/{prefix} s3://replica/{prefix}"
)]
pub struct CliArgs {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Store endpoint for HTTP targets (e.g. https://store.example.com)
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output (debug-level logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List every key under a prefix, one per line
    Keys {
        /// Store URL (scheme://bucket/prefix)
        #[arg(value_name = "URL")]
        url: Option<String>,

        /// Maximum concurrently-draining shards for {prefix} targets
        #[arg(long, default_value_t = 4, value_name = "NUM")]
        shard_concurrency: usize,
    },

    /// Fetch every object under a prefix and write the bodies to stdout
    Scan {
        /// Store URL (scheme://bucket/prefix)
        #[arg(value_name = "URL")]
        url: Option<String>,

        /// Maximum concurrently in-flight fetches
        #[arg(short = 'c', long, default_value_t = default_concurrency(), value_name = "NUM")]
        concurrency: usize,

        /// Gunzip each object body before writing it
        #[arg(long)]
        gunzip: bool,

        /// Maximum concurrently-draining shards for {prefix} targets
        #[arg(long, default_value_t = 4, value_name = "NUM")]
        shard_concurrency: usize,
    },

    /// Delete every object under a prefix
    Purge {
        /// Store URL (scheme://bucket/prefix)
        #[arg(value_name = "URL")]
        url: Option<String>,

        /// Maximum concurrently in-flight deletes
        #[arg(short = 'c', long, default_value_t = default_concurrency(), value_name = "NUM")]
        concurrency: usize,

        /// Report as-if-deleted counts without calling the store
        #[arg(long)]
        dry_run: bool,

        /// Maximum concurrently-draining shards for {prefix} targets
        #[arg(long, default_value_t = 4, value_name = "NUM")]
        shard_concurrency: usize,
    },

    /// Copy every object under a prefix into another bucket
    Copy {
        /// Source store URL (scheme://bucket/prefix)
        #[arg(value_name = "SRC_URL")]
        src: Option<String>,

        /// Destination store URL (scheme://bucket/prefix)
        #[arg(value_name = "DST_URL")]
        dst: Option<String>,

        /// Maximum concurrently in-flight copies
        #[arg(short = 'c', long, default_value_t = default_concurrency(), value_name = "NUM")]
        concurrency: usize,

        /// Maximum concurrently-draining shards for {prefix} targets
        #[arg(long, default_value_t = 4, value_name = "NUM")]
        shard_concurrency: usize,
    },

    /// Compare the key sets of two replicas and count discrepancies
    Compare {
        /// Primary store URL (scheme://bucket/prefix)
        #[arg(value_name = "PRIMARY_URL")]
        primary: Option<String>,

        /// Replica store URL (scheme://bucket/prefix)
        #[arg(value_name = "REPLICA_URL")]
        replica: Option<String>,

        /// Maximum concurrently-draining shards for {prefix} targets
        #[arg(long, default_value_t = 4, value_name = "NUM")]
        shard_concurrency: usize,
    },
}

fn default_concurrency() -> usize {
    // Store operations are I/O bound; a small multiple of the host's
    // logical parallelism keeps the wire busy without flooding it.
    num_cpus::get() * 4
}

/// Parsed store URL components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUrl {
    /// URL scheme (selects the store client: "s3", "http", "https", "mem")
    pub scheme: String,

    /// Bucket name
    pub bucket: String,

    /// Key prefix within the bucket (may be empty, may contain `{prefix}`)
    pub prefix: String,
}

impl StoreUrl {
    /// Parse a store URL string of the form `scheme://bucket/prefix`.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();

        let caps = STORE_URL_REGEX.captures(url).ok_or_else(|| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: "expected format: scheme://bucket/prefix".into(),
        })?;

        let scheme = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        let bucket = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
        let prefix = caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();

        if bucket.is_empty() {
            return Err(ConfigError::InvalidUrl {
                url: url.to_string(),
                reason: "missing bucket".into(),
            });
        }

        if prefix.matches(PREFIX_PLACEHOLDER).count() > 1 {
            return Err(ConfigError::InvalidUrl {
                url: url.to_string(),
                reason: format!("at most one {} placeholder allowed", PREFIX_PLACEHOLDER),
            });
        }

        Ok(Self { scheme, bucket, prefix })
    }

    /// Whether the prefix contains the shard placeholder.
    pub fn has_placeholder(&self) -> bool {
        self.prefix.contains(PREFIX_PLACEHOLDER)
    }

    /// The prefix with the placeholder replaced by a concrete shard.
    pub fn shard_prefix(&self, shard: u8) -> String {
        self.prefix.replace(PREFIX_PLACEHOLDER, &format!("{:02x}", shard))
    }
}

impl std::fmt::Display for StoreUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.prefix)
    }
}

/// Validated pipeline tuning knobs, shared by every subcommand.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum concurrently in-flight store operations
    pub concurrency: usize,

    /// Output buffer capacity (backpressure cap on unconsumed results)
    pub buffer: usize,

    /// Maximum concurrently-draining shards
    pub shard_concurrency: usize,

    /// Show progress indicator
    pub show_progress: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            buffer: 1000,
            shard_concurrency: 4,
            show_progress: true,
        }
    }
}

impl ScanConfig {
    /// Validate bounds. Called once before any I/O begins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::InvalidConcurrency {
                value: self.concurrency,
                max: MAX_CONCURRENCY,
            });
        }
        if self.shard_concurrency == 0 || self.shard_concurrency > MAX_SHARD_CONCURRENCY {
            return Err(ConfigError::InvalidShardConcurrency {
                value: self.shard_concurrency,
                max: MAX_SHARD_CONCURRENCY,
            });
        }
        if self.buffer < MIN_BUFFER {
            return Err(ConfigError::InvalidBuffer {
                value: self.buffer,
                min: MIN_BUFFER,
            });
        }
        Ok(())
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_shard_concurrency(mut self, shard_concurrency: usize) -> Self {
        self.shard_concurrency = shard_concurrency;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_store_url() {
        let url = StoreUrl::parse("s3://my-bucket/some/prefix").unwrap();
        assert_eq!(url.scheme, "s3");
        assert_eq!(url.bucket, "my-bucket");
        assert_eq!(url.prefix, "some/prefix");
    }

    #[test]
    fn test_parse_bucket_only() {
        let url = StoreUrl::parse("s3://my-bucket").unwrap();
        assert_eq!(url.bucket, "my-bucket");
        assert_eq!(url.prefix, "");

        let url = StoreUrl::parse("s3://my-bucket/").unwrap();
        assert_eq!(url.prefix, "");
    }

    #[test]
    fn test_parse_invalid_url() {
        assert!(StoreUrl::parse("not-a-url").is_err());
        assert!(StoreUrl::parse("://bucket/key").is_err());
        assert!(StoreUrl::parse("s3://").is_err());
    }

    #[test]
    fn test_placeholder_detection() {
        let url = StoreUrl::parse("s3://bucket/tiles/{prefix}/v2").unwrap();
        assert!(url.has_placeholder());
        assert_eq!(url.shard_prefix(0x00), "tiles/00/v2");
        assert_eq!(url.shard_prefix(0xff), "tiles/ff/v2");

        let url = StoreUrl::parse("s3://bucket/tiles/v2").unwrap();
        assert!(!url.has_placeholder());
    }

    #[test]
    fn test_double_placeholder_rejected() {
        assert!(StoreUrl::parse("s3://bucket/{prefix}/{prefix}").is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(ScanConfig::default().validate().is_ok());

        let zero = ScanConfig::default().with_concurrency(0);
        assert!(zero.validate().is_err());

        let too_many_shards = ScanConfig::default().with_shard_concurrency(257);
        assert!(too_many_shards.validate().is_err());

        let tiny_buffer = ScanConfig { buffer: 1, ..ScanConfig::default() };
        assert!(tiny_buffer.validate().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let url = StoreUrl::parse("s3://bucket/a/b").unwrap();
        assert_eq!(url.to_string(), "s3://bucket/a/b");
    }
}
