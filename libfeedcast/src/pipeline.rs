//! Run orchestration
//!
//! One run walks every account in order:
//!
//! 1. connect and verify credentials (failure skips the account)
//! 2. probe media capability once
//! 3. for each feed: fetch the newest unposted entry, publish it, mark it
//!    posted, then wait the account's pacing delay
//!
//! A publish refused for the account itself (revoked token, suspended
//! account) ends that account's feed loop.
//!
//! Failures stay inside the feed or account where they happen; a run
//! always finishes with a [`RunSummary`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::accounts::Account;
use crate::capability;
use crate::db::{DedupStore, MarkOutcome};
use crate::error::Result;
use crate::feed::FeedFetcher;
use crate::platforms::mastodon::MastodonClient;
use crate::platforms::Platform;
use crate::publisher::{PublishOutcome, Publisher};
use crate::types::Capability;

/// Builds a platform client for an account
#[async_trait]
pub trait PlatformFactory: Send + Sync {
    async fn connect(&self, account: &Account) -> Result<Box<dyn Platform>>;
}

/// Connects accounts to their Mastodon instance
pub struct MastodonFactory;

#[async_trait]
impl PlatformFactory for MastodonFactory {
    async fn connect(&self, account: &Account) -> Result<Box<dyn Platform>> {
        let client = MastodonClient::connect(&account.credentials).await?;
        Ok(Box::new(client))
    }
}

/// Everything a run needs, built once by the caller
///
/// Dry run mode and the staging directory come from the publisher.
pub struct RunContext {
    pub store: Arc<dyn DedupStore>,
    pub accounts: Vec<Account>,
    pub fetcher: FeedFetcher,
    pub publisher: Publisher,
    pub factory: Arc<dyn PlatformFactory>,
}

/// What happened to one feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Published,
    /// No unposted entry, or the feed could not be read
    NothingNew,
    PublishFailed,
    /// Publishing failed because the platform refused the account
    AccountRejected,
    DryRun,
}

/// Counters for a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub accounts_processed: usize,
    pub accounts_skipped: usize,
    pub published: usize,
    pub nothing_new: usize,
    pub failed: usize,
    pub dry_run: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: FeedOutcome) {
        match outcome {
            FeedOutcome::Published => self.published += 1,
            FeedOutcome::NothingNew => self.nothing_new += 1,
            FeedOutcome::PublishFailed | FeedOutcome::AccountRejected => self.failed += 1,
            FeedOutcome::DryRun => self.dry_run += 1,
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} accounts processed, {} skipped; {} published, {} nothing new, {} failed",
            self.accounts_processed,
            self.accounts_skipped,
            self.published,
            self.nothing_new,
            self.failed
        )?;
        if self.dry_run > 0 {
            write!(f, ", {} dry run", self.dry_run)?;
        }
        Ok(())
    }
}

/// Process every account once
pub async fn run(ctx: &RunContext) -> RunSummary {
    let mut summary = RunSummary::default();
    info!("Starting run over {} accounts", ctx.accounts.len());

    for account in &ctx.accounts {
        match process_account(ctx, account, &mut summary).await {
            Some(()) => summary.accounts_processed += 1,
            None => summary.accounts_skipped += 1,
        }
    }

    info!("Run complete: {}", summary);
    summary
}

/// `None` when the account was skipped before its feeds were touched
async fn process_account(
    ctx: &RunContext,
    account: &Account,
    summary: &mut RunSummary,
) -> Option<()> {
    info!(
        "Processing account {} ({} feeds)",
        account.name,
        account.feeds.len()
    );

    let platform = match ctx.factory.connect(account).await {
        Ok(platform) => platform,
        Err(e) => {
            warn!("Skipping account {}: cannot connect: {}", account.name, e);
            return None;
        }
    };

    if let Err(e) = platform.verify_credentials().await {
        warn!(
            "Skipping account {}: credential check failed: {}",
            account.name, e
        );
        return None;
    }

    let capability = if ctx.publisher.is_dry_run() {
        debug!("Dry run, capability probe skipped for {}", account.name);
        Capability::Restricted
    } else {
        capability::probe(platform.as_ref(), ctx.publisher.staging_dir()).await
    };
    info!("Account {} has {} access", account.name, capability);

    for feed_url in &account.feeds {
        let outcome = process_feed(ctx, platform.as_ref(), account, capability, feed_url).await;
        debug!("Feed {} for {}: {:?}", feed_url, account.name, outcome);
        summary.record(outcome);

        if outcome == FeedOutcome::AccountRejected {
            warn!(
                "Account {} was refused by {}, skipping its remaining feeds",
                account.name,
                platform.name()
            );
            break;
        }

        if outcome == FeedOutcome::Published && !account.delay.is_zero() {
            info!(
                "Waiting {}s before the next post",
                account.delay.as_secs_f64()
            );
            sleep(account.delay).await;
        }
    }

    Some(())
}

async fn process_feed(
    ctx: &RunContext,
    platform: &dyn Platform,
    account: &Account,
    capability: Capability,
    feed_url: &str,
) -> FeedOutcome {
    let store = ctx.store.as_ref();

    let Some(entry) = ctx.fetcher.fetch_latest_unposted(feed_url, store).await else {
        return FeedOutcome::NothingNew;
    };
    // Entries without an identifier are never returned by the fetcher
    let Some(entry_id) = entry.identifier() else {
        return FeedOutcome::NothingNew;
    };

    match ctx
        .publisher
        .publish(platform, account, &entry, capability)
        .await
    {
        PublishOutcome::Published { .. } => {
            match store.mark_posted(feed_url, entry_id, &account.name).await {
                Ok(MarkOutcome::Recorded) => {
                    info!("Recorded {} from {} as posted", entry_id, feed_url);
                }
                Ok(MarkOutcome::AlreadyPosted) => {}
                Err(e) => {
                    error!(
                        "Published {} from {} but could not record it; it may be posted again next run: {}",
                        entry_id, feed_url, e
                    );
                }
            }
            FeedOutcome::Published
        }
        PublishOutcome::Skipped => FeedOutcome::DryRun,
        PublishOutcome::Failed {
            reason,
            account_rejected,
        } => {
            warn!(
                "Entry {} from {} not published for {}: {}",
                entry_id, feed_url, account.name, reason
            );
            if account_rejected {
                FeedOutcome::AccountRejected
            } else {
                FeedOutcome::PublishFailed
            }
        }
    }
}
