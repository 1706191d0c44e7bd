/// Feedmail notifier: polls every stored feed on a fixed cadence and mails
/// unseen items to verified owners.
///
/// - Ticks page through feeds in batches joined to their owners
/// - A feed is polled when the tick lands within one tick period of a
///   multiple of its frequency
/// - Feeds in a batch are fetched concurrently behind a semaphore
/// - The seen-item ledger makes delivery idempotent per (feed, guid)
/// - Failures stay local to the item or feed that produced them

pub mod fetcher;
pub mod notification;
pub mod scheduler;

pub use fetcher::{FeedFetcher, FeedItem, FetchedFeed, HttpFeedFetcher, parse_feed};
pub use notification::render_item_email;
pub use scheduler::{Scheduler, SchedulerConfig, TickReport, is_eligible};
