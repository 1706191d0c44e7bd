use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use feedmail_db::{Database, FeedWithOwner, SeenItemRow, UserRow};
use feedmail_mail::Mailer;
use feedmail_types::{Feed, clamp_frequency};

use crate::fetcher::{FeedFetcher, FeedItem};
use crate::notification::render_item_email;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks. Also the eligibility tolerance.
    pub tick_period: Duration,
    /// Feeds loaded per page.
    pub batch_size: u64,
    /// Mail items published before the feed was added.
    pub notify_old_items: bool,
    /// Upper bound on concurrent fetches within a batch.
    pub max_concurrent_fetches: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(10 * 60),
            batch_size: 1000,
            notify_old_items: false,
            max_concurrent_fetches: 32,
        }
    }
}

/// Counters for one tick, logged after it completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub batches: u64,
    pub scanned: u64,
    pub orphaned: u64,
    pub unverified: u64,
    pub eligible: u64,
    pub fetch_failures: u64,
    pub notified: u64,
    pub item_failures: u64,
}

/// Per-feed result folded into the tick report.
#[derive(Debug, Default)]
struct FeedOutcome {
    fetch_failed: bool,
    notified: u64,
    item_failures: u64,
}

/// Whether a feed polled every `frequency_secs` is due at `tick`.
///
/// The tick instant, taken as a duration since the Unix epoch, is reduced
/// modulo the frequency; the feed is due when the remainder lies strictly
/// within one tick period of zero. `last_fetched` plays no part.
pub fn is_eligible(tick: DateTime<Utc>, frequency_secs: u64, tick_period: Duration) -> bool {
    let frequency = clamp_frequency(frequency_secs) as i128 * 1_000_000_000;
    let tick_nanos = tick.timestamp() as i128 * 1_000_000_000 + tick.timestamp_subsec_nanos() as i128;
    let period = tick_period.as_nanos() as i128;

    let diff = tick_nanos % frequency;
    -period < diff && diff < period
}

/// Everything a per-feed task needs, cheap to clone into it.
#[derive(Clone)]
struct FeedWorker {
    db: Arc<Database>,
    fetcher: Arc<dyn FeedFetcher>,
    mailer: Arc<dyn Mailer>,
    notify_old_items: bool,
}

pub struct Scheduler {
    worker: FeedWorker,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        db: Arc<Database>,
        fetcher: Arc<dyn FeedFetcher>,
        mailer: Arc<dyn Mailer>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            worker: FeedWorker {
                db,
                fetcher,
                mailer,
                notify_old_items: config.notify_old_items,
            },
            config,
        }
    }

    /// Tick forever: once immediately, then every `tick_period`. A tick
    /// that overruns delays the next one instead of overlapping it, and a
    /// failed tick is retried on the next one.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.tick_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Notification scheduler started (period {:?}, batch size {})",
            self.config.tick_period, self.config.batch_size
        );

        loop {
            interval.tick().await;

            match self.tick(Utc::now()).await {
                Ok(report) => info!(
                    "Tick done: {} batches, {} feeds scanned, {} eligible, {} notified, \
                     {} fetch failures, {} item failures, {} orphaned",
                    report.batches,
                    report.scanned,
                    report.eligible,
                    report.notified,
                    report.fetch_failures,
                    report.item_failures,
                    report.orphaned
                ),
                Err(e) => error!("Notification tick failed, retrying next tick: {:#}", e),
            }
        }
    }

    /// One pass over every stored feed, as of `now`.
    ///
    /// Only the count and page queries can fail the tick; everything
    /// below the batch level is logged and counted instead.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let batch_size = self.config.batch_size.max(1);
        let total = self
            .worker
            .db
            .call(|db| db.count_feeds())
            .await
            .context("counting feeds")?;

        let batches = total.div_ceil(batch_size);
        debug!("Processing {} feeds in {} batches", total, batches);

        let mut report = TickReport {
            batches,
            ..Default::default()
        };

        for batch in 0..batches {
            let offset = batch * batch_size;
            let page = self
                .worker
                .db
                .call(move |db| db.feeds_with_owners(offset, batch_size))
                .await
                .with_context(|| format!("loading batch {}", batch))?;

            debug!("Processing batch {} ({} feeds)", batch, page.len());
            self.process_batch(page, now, &mut report).await;
        }

        Ok(report)
    }

    async fn process_batch(&self, page: Vec<FeedWithOwner>, now: DateTime<Utc>, report: &mut TickReport) {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_fetches.max(1)));
        let mut tasks = JoinSet::new();

        for FeedWithOwner { feed, owner } in page {
            report.scanned += 1;

            let Some(owner) = owner else {
                warn!("Orphaned feed {} (owner {} not found)", feed.id, feed.owner);
                report.orphaned += 1;
                continue;
            };

            if !is_eligible(now, feed.frequency, self.config.tick_period) {
                continue;
            }

            if !owner.email_verified {
                report.unverified += 1;
                continue;
            }

            report.eligible += 1;
            let worker = self.worker.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                worker.process_feed(feed, owner).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    if outcome.fetch_failed {
                        report.fetch_failures += 1;
                    }
                    report.notified += outcome.notified;
                    report.item_failures += outcome.item_failures;
                }
                Err(e) => {
                    error!("Feed task aborted: {}", e);
                    report.fetch_failures += 1;
                }
            }
        }
    }
}

impl FeedWorker {
    async fn process_feed(&self, feed: Feed, owner: UserRow) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();

        let fetched = match self.fetcher.fetch(&feed.url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Couldn't fetch feed {} ({}): {:#}", feed.id, feed.url, e);
                outcome.fetch_failed = true;
                return outcome;
            }
        };
        debug!(
            "Fetched {} items from {}",
            fetched.items.len(),
            fetched.title.as_deref().unwrap_or(&feed.url)
        );

        for item in &fetched.items {
            if !self.notify_old_items
                && item.published.is_some_and(|published| published < feed.created_at)
            {
                continue;
            }

            match self.deliver(&feed, &owner, item).await {
                Ok(true) => outcome.notified += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Item {} of feed {} not delivered: {:#}", item.guid, feed.id, e);
                    outcome.item_failures += 1;
                }
            }
        }

        let feed_id = feed.id;
        let fetched_at = Utc::now();
        if let Err(e) = self.db.call(move |db| db.set_last_fetched(feed_id, fetched_at)).await {
            warn!("Failed to update last_fetched for {}: {:#}", feed_id, e);
        }

        outcome
    }

    /// Mail one item unless the ledger already has it. Returns whether an
    /// email went out.
    async fn deliver(&self, feed: &Feed, owner: &UserRow, item: &FeedItem) -> Result<bool> {
        let feed_id = feed.id;
        let guid = item.guid.clone();
        let seen = self
            .db
            .call(move |db| db.count_seen_items(feed_id, &guid))
            .await
            .context("checking seen items")?;
        if seen != 0 {
            return Ok(false);
        }

        self.mailer
            .send(render_item_email(feed, &owner.email, item))
            .await
            .context("sending notification")?;

        let record = SeenItemRow {
            id: Uuid::new_v4(),
            feed_id,
            guid: item.guid.clone(),
            timestamp: Utc::now(),
        };
        self.db
            .call(move |db| db.insert_seen_item(&record))
            .await
            .context("recording seen item")?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HOUR: u64 = 3600;
    const PERIOD: Duration = Duration::from_secs(600);

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn due_on_the_hour_and_just_after() {
        assert!(is_eligible(at(12, 0, 0), HOUR, PERIOD));
        assert!(is_eligible(at(13, 5, 0), HOUR, PERIOD));
        assert!(is_eligible(at(14, 9, 59), HOUR, PERIOD));
    }

    #[test]
    fn not_due_at_the_half_hour() {
        assert!(!is_eligible(at(12, 30, 0), HOUR, PERIOD));
        assert!(!is_eligible(at(12, 10, 0), HOUR, PERIOD));
    }

    #[test]
    fn frequency_below_floor_behaves_as_floor() {
        // every multiple of 10 minutes is due under the floor
        assert!(is_eligible(at(12, 20, 0), 0, PERIOD));
        assert!(is_eligible(at(12, 20, 0), 60, PERIOD));
    }

    #[test]
    fn daily_feed_fires_once_a_day() {
        let day = 24 * HOUR;
        let due = (0..24 * 6)
            .map(|i| at(0, 0, 0) + chrono::Duration::minutes(10 * i))
            .filter(|tick| is_eligible(*tick, day, PERIOD))
            .count();
        assert_eq!(due, 1);
    }
}
