//! feedcast - republish RSS/Atom feeds to Mastodon
//!
//! Runs once: every configured account gets at most one new post per feed,
//! then the process exits. Schedule it with cron or a systemd timer.

use anyhow::Context;
use clap::Parser;
use libfeedcast::accounts::load_accounts;
use libfeedcast::feed::FeedFetcher;
use libfeedcast::logging::{LogFormat, LoggingConfig};
use libfeedcast::pipeline::{self, MastodonFactory, RunContext};
use libfeedcast::{Config, Database, FeedcastError, Publisher, RunSummary};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "feedcast")]
#[command(version)]
#[command(about = "Republish the newest entry of each feed to Mastodon")]
#[command(long_about = "\
feedcast - Republish RSS/Atom feeds to Mastodon

DESCRIPTION:
    For every account definition in the accounts directory, feedcast checks
    the account's feeds and publishes the newest entry that has not been
    posted before. Published entries are recorded in a SQLite database so
    they are never posted twice.

    Images are attached when the account is allowed to upload media;
    otherwise the post is text only.

USAGE:
    feedcast
    feedcast --accounts-dir ./accounts --verbose
    feedcast --dry-run

ACCOUNT FILES (accounts/<name>.toml):
    name = \"tech-news\"
    feeds = [\"https://example.com/feed.xml\"]
    delay_secs = 30

    [credentials]
    instance = \"https://mastodon.social\"
    access_token = \"...\"

ENVIRONMENT:
    A .env file in the working directory is loaded first. Every option can
    also be set through its FEEDCAST_* variable. RUST_LOG overrides the
    log file filter.

EXIT CODES:
    0 - Run finished (individual feeds or accounts may have failed) or interrupted
    1 - Fatal error (no valid accounts, unreadable .env, database or log directory unusable)
")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, env = "FEEDCAST_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding one file per account
    #[arg(long, env = "FEEDCAST_ACCOUNTS_DIR", value_name = "DIR")]
    accounts_dir: Option<PathBuf>,

    /// SQLite database recording published entries
    #[arg(long, env = "FEEDCAST_DATABASE", value_name = "PATH")]
    database: Option<PathBuf>,

    /// Directory receiving one log file per run
    #[arg(long, env = "FEEDCAST_LOG_DIR", value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Log file format (text or json)
    #[arg(long, env = "FEEDCAST_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Mirror progress to stdout
    #[arg(short, long)]
    verbose: bool,

    /// Show what would be posted without posting or recording anything
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    // Must precede parsing so FEEDCAST_* values from .env reach clap
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Error: cannot load .env: {}", e);
            std::process::exit(1);
        }
    }
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(async {
        tokio::select! {
            result = run(cli) => match result {
                Ok(_) => 0,
                Err(e) => {
                    error!("{:#}", e);
                    eprintln!("Error: {:#}", e);
                    exit_code(&e)
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, exiting");
                0
            }
        }
    });

    std::process::exit(code);
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<FeedcastError>()
        .map(FeedcastError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> anyhow::Result<RunSummary> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("cannot load {}", path.display()))?,
        None => Config::load()?,
    };
    apply_overrides(&mut config, &cli);

    let log_file = LoggingConfig::new(config.log_dir(), cli.log_format, cli.verbose)
        .with_retention(config.log_retention)
        .init()?;
    info!(
        "feedcast {} starting, logging to {}",
        env!("CARGO_PKG_VERSION"),
        log_file.display()
    );

    let accounts = load_accounts(
        &config.accounts_dir(),
        Duration::from_secs(config.default_delay_secs),
    )?;

    let db = Database::new(&config.database_path().to_string_lossy()).await?;

    let publisher = Publisher::new(
        config.staging_dir(),
        config.max_image_bytes,
        config.fetch_timeout(),
    )?
    .with_dry_run(cli.dry_run);

    let ctx = RunContext {
        store: Arc::new(db.clone()),
        accounts,
        fetcher: FeedFetcher::new(config.fetch_timeout())?.with_max_bytes(config.max_feed_bytes),
        publisher,
        factory: Arc::new(MastodonFactory),
    };

    let summary = pipeline::run(&ctx).await;
    db.close().await;

    Ok(summary)
}

/// Command line values win over the configuration file
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(dir) = &cli.accounts_dir {
        config.accounts_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(path) = &cli.database {
        config.database_path = path.to_string_lossy().into_owned();
    }
    if let Some(dir) = &cli.log_dir {
        config.log_dir = dir.to_string_lossy().into_owned();
    }
}
