//! `claimwatch` — per-stage commands for the news claim-tracking
//! pipeline. Every stage accepts a pipeline date override and is safe to
//! re-run.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cw_domain::config::Config;
use cw_domain::dates;
use cw_pipeline::{answers, claims, dedupe, enrich, roundups, run, verify, StageContext};
use cw_providers::HttpLmClient;
use cw_store::Stores;

#[derive(Parser)]
#[command(name = "claimwatch", version, about = "News claim tracking pipeline")]
struct Cli {
    /// Pipeline date to use (YYYY-MM-DD); defaults to today in the fixed
    /// UTC-5 offset.
    #[arg(long, global = true)]
    date: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full daily pipeline: enrich, extract claims, verify,
    /// roundups, then the run log.
    Pipeline {
        /// Abort on the first stage failure instead of continuing.
        #[arg(long)]
        stop_on_error: bool,
    },
    /// Enrich articles that are missing summary/takeaways.
    Enrich {
        #[arg(long, default_value_t = 50)]
        batch: usize,
    },
    /// Extract claims from unprocessed articles.
    Claims {
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
    },
    /// Check claims that are due today and consume due follow-ups.
    Verify {
        /// Drain due follow-ups even outside the end-of-day window.
        #[arg(long)]
        drain_followups: bool,
    },
    /// Answer the follow-up questions enrichment raised.
    Answers {
        #[arg(long, default_value_t = 10)]
        batch: usize,
    },
    /// Generate any missing daily/weekly/monthly/yearly roundups.
    Roundups,
    /// Collapse duplicate follow-ups on (claim, date).
    Dedupe {
        /// Report without deleting.
        #[arg(long)]
        dry_run: bool,
        /// Max duplicate groups to process.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(date) = &cli.date {
        chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .context("--date must be in YYYY-MM-DD format")?;
        std::env::set_var(dates::PIPELINE_RUN_DATE, date);
    }

    let config = Config::from_env().context("loading configuration")?;
    let stores = Stores::open(&config.data_dir).context("opening document store")?;
    let lm = Arc::new(HttpLmClient::from_config(&config).context("building LLM client")?);
    let ctx = StageContext::new(stores, lm, config.llm_model.clone());

    match cli.command {
        Command::Pipeline { stop_on_error } => run::run_pipeline(&ctx, stop_on_error).await?,
        Command::Enrich { batch } => enrich::run(&ctx, batch).await?,
        Command::Claims { batch_size } => claims::run(&ctx, batch_size).await?,
        Command::Verify { drain_followups } => {
            let drain = drain_followups || verify::in_drain_window();
            verify::run(&ctx, drain).await?;
        }
        Command::Answers { batch } => answers::run(&ctx, batch).await?,
        Command::Roundups => roundups::run(&ctx).await?,
        Command::Dedupe { dry_run, limit } => {
            let stats = dedupe::run(&ctx.stores, limit, dry_run)?;
            println!(
                "groups={} kept={} deleted={} dry_run={}",
                stats.groups, stats.kept, stats.deleted, stats.dry_run
            );
        }
    }

    Ok(())
}
