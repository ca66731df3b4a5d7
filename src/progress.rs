//! Progress reporting for bucket scans
//!
//! Provides the shared processed-counter handle used by listers and
//! pipelines, plus real-time progress display using indicatif.

use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic processed counter with an elapsed-derived rate.
///
/// Cloneable handle; every clone observes the same count and the same
/// start instant, so `rate()` reads the same everywhere.
#[derive(Debug, Clone)]
pub struct ScanCounter {
    count: Arc<AtomicU64>,
    started: Instant,
}

impl ScanCounter {
    pub fn new() -> Self {
        Self {
            count: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
        }
    }

    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Processed items per second since construction.
    pub fn rate(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.count() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for ScanCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress reporter that displays scan status on stderr.
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the display with a verb ("Listed", "Deleted", ...) and the
    /// counter backing it.
    pub fn update(&self, verb: &str, counter: &ScanCounter) {
        self.bar.set_message(format!(
            "{} {} @ {:.0}/s",
            verb,
            format_number(counter.count()),
            counter.rate()
        ));
    }

    /// Set a status message.
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message.
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display.
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a header at the start of an operation.
pub fn print_header(operation: &str, target: &str, concurrency: usize) {
    eprintln!();
    eprintln!(
        "{} {}",
        style("bucketscan").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Operation:").bold(), operation);
    eprintln!("  {} {}", style("Target:").bold(), target);
    eprintln!("  {} {}", style("Concurrency:").bold(), concurrency);
    eprintln!();
}

/// Print a summary when an operation completes.
pub fn print_summary(verb: &str, count: u64, bytes: Option<u64>, duration: Duration) {
    let secs = duration.as_secs_f64();
    let rate = if secs > 0.0 { count as f64 / secs } else { 0.0 };

    eprintln!();
    eprintln!("{}", style("Complete").green().bold());
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style(format!("{}:", verb)).bold(), format_number(count));
    if let Some(bytes) = bytes {
        eprintln!("  {} {}", style("Total Size:").bold(), format_size(bytes, BINARY));
    }
    eprintln!(
        "  {} {:.1}s ({:.0}/sec)",
        style("Duration:").bold(),
        secs,
        rate
    );
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_counter_monotonic() {
        let counter = ScanCounter::new();
        assert_eq!(counter.count(), 0);
        counter.increment();
        counter.increment();
        assert_eq!(counter.count(), 2);

        let clone = counter.clone();
        clone.increment();
        assert_eq!(counter.count(), 3);
    }
}
