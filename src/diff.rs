//! Streaming two-replica key-set comparison
//!
//! `ReplicaDiffer` drains a primary and a replica key stream
//! concurrently into one shared diff index. The index is self-cleaning:
//! the first sighting of a key inserts it, the second sighting (from
//! either side) removes it as matched. At any instant the index size is
//! exactly the number of keys seen on one side but not yet the other;
//! once both streams complete, that size is the authoritative
//! discrepancy count.
//!
//! The differ says nothing about *which* side is missing a key; callers
//! who need that re-query the stores for the keys they care about.

use crate::error::{Result, ScanError};
use crate::error::StoreResult;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Periodic progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffProgress {
    /// Keys drained from the primary so far
    pub scanned_primary: u64,
    /// Keys drained from the replica so far
    pub scanned_replica: u64,
    /// Live diff-index size
    pub discrepancies: u64,
}

/// Final comparison result.
#[derive(Debug, Clone)]
pub struct DiffReport {
    pub scanned_primary: u64,
    pub scanned_replica: u64,
    /// Keys present in exactly one of the two key spaces at comparison
    /// time.
    pub discrepancies: u64,
    pub duration: Duration,
}

/// Streaming key-set differ over two replicas.
pub struct ReplicaDiffer {
    primary: BoxStream<'static, StoreResult<String>>,
    replica: BoxStream<'static, StoreResult<String>>,
    snapshot_every: Duration,
}

impl ReplicaDiffer {
    pub fn new(
        primary: BoxStream<'static, StoreResult<String>>,
        replica: BoxStream<'static, StoreResult<String>>,
    ) -> Self {
        Self {
            primary,
            replica,
            snapshot_every: Duration::from_millis(500),
        }
    }

    /// Override the progress snapshot interval.
    pub fn snapshot_every(mut self, interval: Duration) -> Self {
        self.snapshot_every = interval;
        self
    }

    /// Run the comparison to completion.
    pub async fn run(self) -> Result<DiffReport> {
        self.run_with_progress(|_| {}).await
    }

    /// Run the comparison, invoking `progress` on a fixed interval and
    /// once more with the final state before returning.
    ///
    /// Completion requires both legs to finish; either leg's error
    /// aborts the comparison and propagates.
    pub async fn run_with_progress<F>(self, mut progress: F) -> Result<DiffReport>
    where
        F: FnMut(DiffProgress),
    {
        let started = std::time::Instant::now();

        let mut primary = self.primary.fuse();
        let mut replica = self.replica.fuse();

        let mut index: HashSet<String> = HashSet::new();
        let mut scanned_primary = 0u64;
        let mut scanned_replica = 0u64;
        let mut primary_done = false;
        let mut replica_done = false;

        let mut ticker = tokio::time::interval(self.snapshot_every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would report an all-zero snapshot.
        ticker.reset();

        // First sighting inserts, second removes: the index holds exactly
        // the keys currently seen on one side only.
        fn toggle(index: &mut HashSet<String>, key: String) {
            if !index.insert(key.clone()) {
                index.remove(&key);
            }
        }

        while !(primary_done && replica_done) {
            tokio::select! {
                item = primary.next(), if !primary_done => match item {
                    Some(Ok(key)) => {
                        if key.is_empty() {
                            continue;
                        }
                        scanned_primary += 1;
                        toggle(&mut index, key);
                    }
                    Some(Err(e)) => return Err(ScanError::Store(e)),
                    None => {
                        debug!(scanned = scanned_primary, "primary leg complete");
                        primary_done = true;
                    }
                },
                item = replica.next(), if !replica_done => match item {
                    Some(Ok(key)) => {
                        if key.is_empty() {
                            continue;
                        }
                        scanned_replica += 1;
                        toggle(&mut index, key);
                    }
                    Some(Err(e)) => return Err(ScanError::Store(e)),
                    None => {
                        debug!(scanned = scanned_replica, "replica leg complete");
                        replica_done = true;
                    }
                },
                _ = ticker.tick() => {
                    progress(DiffProgress {
                        scanned_primary,
                        scanned_replica,
                        discrepancies: index.len() as u64,
                    });
                }
            }
        }

        let report = DiffReport {
            scanned_primary,
            scanned_replica,
            discrepancies: index.len() as u64,
            duration: started.elapsed(),
        };

        progress(DiffProgress {
            scanned_primary,
            scanned_replica,
            discrepancies: report.discrepancies,
        });

        debug!(
            scanned_primary,
            scanned_replica,
            discrepancies = report.discrepancies,
            "comparison complete"
        );

        Ok(report)
    }
}
