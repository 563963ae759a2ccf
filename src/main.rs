use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use tokio_util::sync::CancellationToken;

use sitecrawl::config::CrawlConfig;
use sitecrawl::crawl::CrawlEngine;
use sitecrawl::{cli, error, logging};

#[tokio::main]
async fn main() -> ExitCode {
    match try_main().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(error::exit_code_for(&err))
        }
    }
}

async fn try_main() -> anyhow::Result<()> {
    logging::init().context("init logging")?;

    let args = cli::CrawlArgs::parse();
    tracing::debug!(?args, "parsed cli");

    let config = Arc::new(CrawlConfig::from_args(args).map_err(anyhow::Error::from)?);
    tracing::info!(url = %config.start_url, workers = config.workers, "starting crawl");

    let engine = CrawlEngine::new(Arc::clone(&config)).context("build crawl engine")?;

    let cancel = CancellationToken::new();
    let ctrlc_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received ctrl-c, stopping crawl");
            ctrlc_cancel.cancel();
        }
    });

    let summary = engine.run(cancel).await.context("crawl")?;
    tracing::info!(
        total = summary.total,
        ok = summary.ok,
        redirects = summary.redirects,
        http_errors = summary.http_errors,
        transport_failures = summary.transport_failures,
        "crawl finished"
    );

    Ok(())
}
