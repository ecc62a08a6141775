//! TrialScope — clinical study search and relevance ranking.
//! Entry point for the command-line binary.

mod cli;
mod config;

use std::fs::File;
use std::io;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use trialscope_ingestion::export::{to_rows, write_csv, write_table};
use trialscope_ingestion::{Pipeline, ProgressEvent, RunReport, SourceStatus};

/// Rows echoed to stdout after a run.
const PREVIEW_ROWS: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trialscope=debug,info")),
        )
        .init();

    let args = cli::Args::parse();
    info!("TrialScope v{}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load().context("loading trialscope.toml")?;
    let env_credential = config
        .llm
        .credential_env()
        .and_then(|var| std::env::var(var).ok());
    let request = args.to_request(&config, env_credential);
    if request.ai_enabled && request.ai_credential.is_none() && config.llm.credential_env().is_some() {
        warn!(
            "AI classification requested but no credential found (set {} or pass --api-key); default scores will be used",
            config.llm.credential_env().unwrap_or_default()
        );
    }

    let (progress_tx, progress_rx) = broadcast::channel(64);
    let pipeline = Pipeline::new(config.governor.to_governor_config())?
        .with_mode(args.mode(&config))
        .with_llm(config.llm.settings())
        .with_progress(progress_tx);
    tokio::spawn(log_progress(progress_rx));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing with the results gathered so far");
            on_interrupt.cancel();
        }
    });

    let output = pipeline.run(request, cancel).await?;
    summarise(&output.report);

    let rows = to_rows(&output.records);
    let path = args.output_path(&config);
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    write_csv(&rows, file)?;
    info!(n = rows.len(), path = %path.display(), "Results written");

    if let Some(report_path) = &args.report {
        let file = File::create(report_path).with_context(|| format!("creating {}", report_path.display()))?;
        serde_json::to_writer_pretty(file, &output.report)?;
    }

    write_table(&rows[..rows.len().min(PREVIEW_ROWS)], io::stdout().lock())?;
    Ok(())
}

async fn log_progress(mut rx: broadcast::Receiver<ProgressEvent>) {
    loop {
        match rx.recv().await {
            Ok(ev) => debug!(
                stage = ?ev.stage,
                source = ?ev.source,
                records = ev.records,
                elapsed_ms = ev.elapsed_ms,
                "{}",
                ev.message
            ),
            Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "Progress events dropped"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn summarise(report: &RunReport) {
    for s in &report.sources {
        match s.status {
            SourceStatus::Succeeded => info!(source = %s.display_name, n = s.returned, elapsed_ms = s.elapsed_ms, "Source ok"),
            SourceStatus::Cancelled => warn!(source = %s.display_name, "Source cancelled"),
            SourceStatus::Failed | SourceStatus::TimedOut => warn!(
                source = %s.display_name,
                status = ?s.status,
                error = s.error.as_deref().unwrap_or(""),
                "Source failed"
            ),
        }
    }
    info!(
        found = report.total_before_dedup,
        unique = report.total_after_dedup,
        classification = ?report.classification_mode,
        cancelled = report.cancelled,
        duration_ms = report.duration_ms,
        "Run complete"
    );
}
