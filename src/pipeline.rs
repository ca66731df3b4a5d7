//! Concurrency-bounded processing pipeline
//!
//! Applies an async per-key operation to an upstream key stream with a
//! fixed bound on in-flight operations and a fixed cap on buffered,
//! unconsumed results.
//!
//! ```text
//!  key stream ──► driver task ──► spawned op (permit 1..C) ──┐
//!                    ▲                                       │
//!                    │ permit released                       ▼
//!                    └────────────────────── bounded output channel ──► consumer
//! ```
//!
//! Backpressure falls out of the two bounds: a full output channel blocks
//! workers, workers hold concurrency permits, and the driver cannot pull
//! more input until a permit frees.
//!
//! Output is in completion order. At concurrency 1 the driver cannot
//! dispatch the next key until the previous operation has handed off its
//! result, so completion order equals submission order.

use crate::error::{ScanError, StoreResult};
use crate::progress::ScanCounter;
use futures::stream::BoxStream;
use futures::{Future, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

/// What the pipeline does when an operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// First non-benign error stops input, drains in-flight work, and
    /// surfaces the error as the stream's terminal item.
    FailFast,
    /// Per-item errors are emitted as `Failed` items; the pipeline keeps
    /// going. Upstream listing errors still abort.
    PassThrough,
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Maximum concurrently in-flight operations.
    pub concurrency: usize,
    /// Output buffer capacity; caps buffered-but-unconsumed results.
    pub buffer: usize,
    /// Error policy.
    pub error_mode: ErrorMode,
    /// Whether benign skips appear in the output at all.
    pub emit_skipped: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get() * 4,
            buffer: 1000,
            error_mode: ErrorMode::FailFast,
            emit_skipped: false,
        }
    }
}

/// Outcome of one per-key operation.
#[derive(Debug)]
pub enum ItemOutcome<T> {
    /// Operation succeeded and produced a value.
    Success(T),
    /// Benign skip (e.g. not-found on fetch/delete, dry-run delete).
    Skipped,
    /// Genuine failure. Fail-fast mode turns this into the terminal
    /// stream error; pass-through mode emits it as data.
    Failed(ScanError),
}

/// A key paired with its operation outcome.
#[derive(Debug)]
pub struct PipelineItem<T> {
    pub key: String,
    pub outcome: ItemOutcome<T>,
}

/// Completion-ordered output stream of a pipeline run.
///
/// Yields `Ok(item)` per processed key and at most one terminal
/// `Err(_)`, after which the stream is finished.
pub struct ProcessedStream<T> {
    rx: mpsc::Receiver<Result<PipelineItem<T>, ScanError>>,
    stats: ScanCounter,
    finished: bool,
}

impl<T> ProcessedStream<T> {
    /// Processed-counter handle; usable while the stream is running.
    pub fn stats(&self) -> ScanCounter {
        self.stats.clone()
    }
}

impl<T> Stream for ProcessedStream<T> {
    type Item = Result<PipelineItem<T>, ScanError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                if item.is_err() {
                    this.finished = true;
                    this.rx.close();
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Run `op` over every key in `keys` with bounded concurrency.
///
/// `counter` is the processed counter exposed via
/// [`ProcessedStream::stats`]; the operation itself decides when to
/// increment it (success vs. counted skip differs per operation).
pub fn process<F, Fut, T>(
    keys: BoxStream<'static, StoreResult<String>>,
    options: PipelineOptions,
    counter: ScanCounter,
    op: F,
) -> ProcessedStream<T>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineItem<T>> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(options.buffer.max(1));
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let aborted = Arc::new(AtomicBool::new(false));
    let op = Arc::new(op);

    let concurrency = options.concurrency.max(1);
    let fail_fast = options.error_mode == ErrorMode::FailFast;
    let emit_skipped = options.emit_skipped;

    let stats = counter.clone();
    tokio::spawn(async move {
        let mut keys = keys;

        loop {
            if aborted.load(Ordering::Relaxed) {
                break;
            }

            let key = match keys.next().await {
                Some(Ok(key)) => key,
                Some(Err(e)) => {
                    // Upstream listing failure aborts regardless of the
                    // per-item error policy.
                    aborted.store(true, Ordering::Relaxed);
                    let _ = tx.send(Err(ScanError::Store(e))).await;
                    break;
                }
                None => break,
            };

            // Blank keys carry no work (line-delimited input convention).
            if key.is_empty() {
                continue;
            }

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            if aborted.load(Ordering::Relaxed) {
                break;
            }

            let tx = tx.clone();
            let op = Arc::clone(&op);
            let aborted = Arc::clone(&aborted);

            tokio::spawn(async move {
                let PipelineItem { key, outcome } = op(key).await;

                match outcome {
                    ItemOutcome::Failed(err) if fail_fast => {
                        aborted.store(true, Ordering::Relaxed);
                        let _ = tx.send(Err(err)).await;
                    }
                    ItemOutcome::Skipped if !emit_skipped => {}
                    outcome => {
                        let _ = tx.send(Ok(PipelineItem { key, outcome })).await;
                    }
                }

                drop(permit);
            });
        }

        // Let every in-flight operation finish before the output channel
        // closes; nothing is cancelled mid-flight.
        let _ = Arc::clone(&semaphore)
            .acquire_many_owned(concurrency as u32)
            .await;

        debug!(aborted = aborted.load(Ordering::Relaxed), "pipeline drained");
    });

    ProcessedStream {
        rx,
        stats,
        finished: false,
    }
}
