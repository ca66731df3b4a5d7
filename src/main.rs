//! bucketscan - Bulk Object-Store Scanner
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use bucketscan::config::{CliArgs, Command, ScanConfig, StoreUrl};
use bucketscan::ops::GetOptions;
use bucketscan::pipeline::{ItemOutcome, ProcessedStream};
use bucketscan::progress::{print_header, print_summary, ProgressReporter, ScanCounter};
use bucketscan::store::{HttpStore, MemoryStore, ObjectStore, TransportConfig};
use bucketscan::{DiffProgress, ReplicaDiffer};
use clap::Parser;
use futures::StreamExt;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let command = match args.command.clone() {
        Some(command) => command,
        None => {
            bail!("Usage: bucketscan <keys|scan|purge|copy|compare> <url> [options]");
        }
    };

    match command {
        Command::Keys { url, shard_concurrency } => {
            let url = parse_url(url)?;
            let config = config_for(&args, shard_concurrency, None);
            run_keys(store_for(&args, &url)?, &url, &config, args.quiet).await
        }
        Command::Scan { url, concurrency, gunzip, shard_concurrency } => {
            let url = parse_url(url)?;
            let config = config_for(&args, shard_concurrency, Some(concurrency));
            run_scan(store_for(&args, &url)?, &url, gunzip, &config).await
        }
        Command::Purge { url, concurrency, dry_run, shard_concurrency } => {
            let url = parse_url(url)?;
            let config = config_for(&args, shard_concurrency, Some(concurrency));
            run_purge(store_for(&args, &url)?, &url, dry_run, &config).await
        }
        Command::Copy { src, dst, concurrency, shard_concurrency } => {
            let src = parse_url(src)?;
            let dst = parse_url(dst)?;
            let config = config_for(&args, shard_concurrency, Some(concurrency));
            run_copy(store_for(&args, &src)?, &src, &dst, &config).await
        }
        Command::Compare { primary, replica, shard_concurrency } => {
            let primary = parse_url(primary)?;
            let replica = parse_url(replica)?;
            let config = config_for(&args, shard_concurrency, None);
            run_compare(store_for(&args, &primary)?, &primary, &replica, &config).await
        }
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    Ok(())
}

fn parse_url(url: Option<String>) -> Result<StoreUrl> {
    let url = url.context("Usage: bucketscan <command> <scheme://bucket/prefix> [options]")?;
    StoreUrl::parse(&url).context("Invalid store url")
}

fn config_for(args: &CliArgs, shard_concurrency: usize, concurrency: Option<usize>) -> ScanConfig {
    let mut config = ScanConfig::default().with_shard_concurrency(shard_concurrency);
    if let Some(concurrency) = concurrency {
        config = config.with_concurrency(concurrency);
    }
    config.show_progress = !args.quiet;
    config
}

/// Pick a store client from the URL scheme.
///
/// `mem://` targets get a process-local store, useful for exercising the
/// tool without a live endpoint. Everything else goes over HTTP against
/// `--endpoint` (or, for http/https schemes, the bucket host itself).
fn store_for(args: &CliArgs, url: &StoreUrl) -> Result<Arc<dyn ObjectStore>> {
    if url.scheme == "mem" {
        return Ok(Arc::new(MemoryStore::new()));
    }

    let endpoint = match (&args.endpoint, url.scheme.as_str()) {
        (Some(endpoint), _) => endpoint.clone(),
        (None, "http" | "https") => format!("{}://{}", url.scheme, url.bucket),
        (None, _) => bail!(
            "no endpoint for {}:// targets; pass --endpoint",
            url.scheme
        ),
    };

    let store = HttpStore::new(endpoint, TransportConfig::default())
        .context("Failed to build store client")?;
    Ok(Arc::new(store))
}

/// Spawn a task refreshing a progress spinner from `counter` every
/// 500ms. Abort the returned handle once the operation completes.
fn watch_progress(
    verb: &'static str,
    counter: ScanCounter,
) -> (Arc<ProgressReporter>, tokio::task::JoinHandle<()>) {
    let reporter = Arc::new(ProgressReporter::new());
    let bar = Arc::clone(&reporter);
    let watcher = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        loop {
            ticker.tick().await;
            bar.update(verb, &counter);
        }
    });
    (reporter, watcher)
}

async fn run_keys(
    store: Arc<dyn ObjectStore>,
    url: &StoreUrl,
    config: &ScanConfig,
    quiet: bool,
) -> Result<()> {
    let mut keys = bucketscan::list_keys(store, url, config);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut listed = 0u64;

    while let Some(key) = keys.next().await {
        let key = key.context("Listing failed")?;
        writeln!(out, "{}", key).context("Failed to write key")?;
        listed += 1;
    }

    if !quiet {
        eprintln!("{} keys", listed);
    }
    Ok(())
}

async fn run_scan(
    store: Arc<dyn ObjectStore>,
    url: &StoreUrl,
    gunzip: bool,
    config: &ScanConfig,
) -> Result<()> {
    if config.show_progress {
        print_header("scan", &url.to_string(), config.concurrency);
    }

    let options = GetOptions {
        body_only: true,
        gunzip,
        ..GetOptions::default()
    };

    let stream = bucketscan::scan_objects(store, url, options, config)
        .context("Invalid scan options")?;
    let stats = stream.stats();

    let bytes = drain_bodies(stream).await?;

    if config.show_progress {
        print_summary("Fetched", stats.count(), Some(bytes), stats.elapsed());
    }
    Ok(())
}

async fn drain_bodies(mut stream: ProcessedStream<bucketscan::FetchedObject>) -> Result<u64> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut bytes = 0u64;

    while let Some(item) = stream.next().await {
        let item = item.context("Scan failed")?;
        if let ItemOutcome::Success(object) = item.outcome {
            bytes += object.body.len() as u64;
            out.write_all(&object.body).context("Failed to write body")?;
        }
    }
    Ok(bytes)
}

async fn run_purge(
    store: Arc<dyn ObjectStore>,
    url: &StoreUrl,
    dry_run: bool,
    config: &ScanConfig,
) -> Result<()> {
    if config.show_progress {
        print_header(
            if dry_run { "purge (dry run)" } else { "purge" },
            &url.to_string(),
            config.concurrency,
        );
    }

    let mut stream = bucketscan::purge_objects(store, url, dry_run, config)
        .context("Invalid purge options")?;
    let stats = stream.stats();

    let progress = config
        .show_progress
        .then(|| watch_progress("Deleted", stats.clone()));

    let mut result = Ok(());
    while let Some(item) = stream.next().await {
        if let Err(e) = item {
            result = Err(e);
            break;
        }
    }

    if let Some((reporter, watcher)) = progress {
        watcher.abort();
        reporter.finish_and_clear();
    }

    result.context("Purge failed")?;

    if config.show_progress {
        print_summary("Deleted", stats.count(), None, stats.elapsed());
    }
    Ok(())
}

async fn run_copy(
    store: Arc<dyn ObjectStore>,
    src: &StoreUrl,
    dst: &StoreUrl,
    config: &ScanConfig,
) -> Result<()> {
    if config.show_progress {
        print_header("copy", &format!("{} -> {}", src, dst), config.concurrency);
    }

    let mut stream = bucketscan::copy_objects(store, src, dst, config)
        .context("Invalid copy options")?;
    let stats = stream.stats();

    while let Some(item) = stream.next().await {
        item.context("Copy failed")?;
    }

    if config.show_progress {
        print_summary("Copied", stats.count(), None, stats.elapsed());
    }
    Ok(())
}

async fn run_compare(
    store: Arc<dyn ObjectStore>,
    primary: &StoreUrl,
    replica: &StoreUrl,
    config: &ScanConfig,
) -> Result<()> {
    if config.show_progress {
        print_header("compare", &format!("{} <> {}", primary, replica), config.shard_concurrency);
    }

    let differ: ReplicaDiffer =
        bucketscan::compare_replicas(store, primary, replica, config)
            .context("Invalid compare options")?;

    let show_progress = config.show_progress;
    let report = differ
        .run_with_progress(move |progress: DiffProgress| {
            if show_progress {
                eprint!(
                    "\r{} primary scanned - {} replica scanned - {} discrepancies",
                    progress.scanned_primary, progress.scanned_replica, progress.discrepancies
                );
            }
        })
        .await
        .context("Comparison failed")?;

    if show_progress {
        eprintln!();
    }
    println!("{}", report.discrepancies);
    Ok(())
}
