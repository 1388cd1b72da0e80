//! CLI entry point for bookfetch.

use std::sync::Arc;

use anyhow::{Context, Result};
use bookfetch::provider::enrichment::OpenLibrarySource;
use bookfetch::{
    build_default_providers, limiter, DownloadManager, Orchestrator, RateLimiter, RecordCache,
    Settings, TransferClient,
};
use clap::Parser;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    // Settings: defaults, then environment, then CLI flags.
    let mut settings = Settings::from_env();
    if args.elevated {
        settings.elevated = true;
    }
    if let Some(concurrency) = args.concurrency {
        settings.concurrency = Some(usize::from(concurrency));
    }
    if let Some(ceiling) = args.retry_ceiling {
        settings.retry_ceiling = u32::from(ceiling);
    }
    if let Some(output_dir) = args.output_dir {
        settings.output_dir = output_dir;
    }

    info!(
        tier = if settings.elevated { "elevated" } else { "free" },
        rate_limit = settings.effective_rate_limit(),
        concurrency = settings.effective_concurrency(),
        "bookfetch starting"
    );

    tokio::fs::create_dir_all(&settings.output_dir)
        .await
        .with_context(|| format!("creating output directory {}", settings.output_dir.display()))?;

    let client = reqwest::Client::builder()
        .timeout(settings.timeout)
        .gzip(true)
        .cookie_store(true)
        .build()
        .context("building HTTP client")?;

    let rate_limiter = Arc::new(RateLimiter::per_provider(
        settings.effective_rate_limit(),
        limiter::WINDOW,
    ));

    let providers = build_default_providers(&client, &rate_limiter, &settings);
    let manager = DownloadManager::new(
        TransferClient::new(client.clone(), settings.max_file_size),
        Arc::clone(&rate_limiter),
        settings.output_dir.clone(),
    );
    let cache = RecordCache::open(&settings.output_dir.join("bookfetch.db"))
        .await
        .context("opening dedup cache")?;

    let mut orchestrator = Orchestrator::new(providers, manager, cache, &settings);
    if !args.no_enrichment {
        orchestrator = orchestrator.with_enrichment(Arc::new(OpenLibrarySource::new(
            client,
            "https://openlibrary.org".to_string(),
        )));
    }
    if args.no_covers {
        orchestrator = orchestrator.without_covers();
    }

    let report = orchestrator
        .run(&args.query, usize::from(args.max_results))
        .await?;

    for outcome in report.succeeded.iter().chain(&report.recovered) {
        info!(slug = %outcome.slug, path = %outcome.path.display(), attempts = outcome.attempts, "acquired");
    }
    for abandoned in &report.abandoned {
        warn!(slug = %abandoned.slug, reason = %abandoned.reason, "abandoned");
        for failure in &abandoned.mirror_failures {
            warn!(mirror = %failure.url, reason = %failure.reason, "  mirror failure");
        }
    }

    info!(
        acquired = report.acquired(),
        recovered = report.recovered.len(),
        abandoned = report.abandoned.len(),
        skipped_cached = report.skipped_cached.len(),
        covers = report.covers_fetched,
        merge_conflicts = report.merge_conflicts,
        "batch finished"
    );

    Ok(())
}
