use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod crawler;
mod error;
mod extract;
mod fetch;
mod models;
mod report;
mod tracker;
mod validate;

#[tokio::main]
async fn main() -> Result<()> {
    let args = config::AppArgs::parse();

    // RUST_LOG wins over the --debug flag.
    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = config::build_config(&args)?;
    info!(
        "Starting advisor data collection in {} mode",
        if config.test_mode { "TEST" } else { "FULL" }
    );
    if config.debug_mode {
        info!("Debug logging enabled");
    }

    let fetcher = fetch::HttpFetcher::new(&config)?;
    let crawler = crawler::Crawler::new(fetcher, config.clone());

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let outcome = crawler.run_until(shutdown).await?;
    if outcome.interrupted {
        tracing::warn!("Run interrupted; exporting partial results.");
    }

    let report = report::finalize(&outcome, &config)?;
    match &report.export_path {
        Some(path) => info!("Wrote {} records to {}", report.statistics.total_records, path.display()),
        None => info!("No records to export"),
    }
    if let Some(path) = &report.error_log_path {
        info!("{} errors logged to {}", outcome.tracker.errors().len(), path.display());
    }

    Ok(())
}
