//! OPS bibliographic fetcher
//!
//! Loads client configuration, fetches bibliographic records for a list of
//! publication numbers in bulk, prints each returned document and reports the
//! latest fair-use quota snapshot.

mod cli;
mod metrics;

use anyhow::{Context as _, Result};
use ops_client::{BulkOptions, Client, ClientConfig, Context, QuotaSnapshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Args, USAGE};

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs to stderr so stdout carries only documents
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }

    let prometheus = if args.metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let numbers = args.collect_numbers()?;

    let config_path = ClientConfig::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = ClientConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.base_url,
        max_retries = config.max_retries,
        timeout_ms = config.timeout().as_millis() as u64,
        "configuration loaded"
    );

    let client = Client::new(config).context("failed to build OPS client")?;

    let shutdown = CancellationToken::new();
    let ctx = Context::new().with_cancellation(shutdown.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            shutdown.cancel();
        }
    });

    let options = BulkOptions::new()
        .with_batch_size(args.batch_size)
        .on_progress(|index, total| info!(batch = index, total, "batch fetched"));

    info!(numbers = numbers.len(), reference = %args.reference, "fetching bibliographic data");
    let result = client
        .biblio_bulk(&ctx, args.reference, &numbers, &options)
        .await;

    if let Some(snapshot) = client.quota() {
        report_quota(&snapshot);
    }

    let documents = result.context("bulk fetch failed")?;
    for document in &documents {
        println!("{document}");
    }
    info!(documents = documents.len(), "fetch complete");

    if let Some(handle) = prometheus {
        print!("{}", handle.render());
    }
    Ok(())
}

fn report_quota(snapshot: &QuotaSnapshot) {
    let individual_pct = snapshot
        .individual
        .and_then(|usage| usage.usage_pct());
    let registered_pct = snapshot
        .registered
        .and_then(|usage| usage.usage_pct());
    info!(
        status = snapshot.status.as_deref().unwrap_or("unknown"),
        worst_light = snapshot.worst_light().map(|l| l.label()),
        individual_used = snapshot.individual.map(|u| u.used),
        individual_pct,
        registered_used = snapshot.registered.map(|u| u.used),
        registered_pct,
        "quota"
    );
}
