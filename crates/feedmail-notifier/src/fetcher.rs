use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

/// One entry of a fetched feed, reduced to what a notification needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    /// Links beyond the primary one.
    pub links: Vec<String>,
    pub content: String,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedFeed {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed>;
}

/// Fetches over HTTP(S) and parses RSS, Atom or JSON Feed documents.
pub struct HttpFeedFetcher {
    client: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("feedmail/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        debug!("Fetched {} ({} bytes)", url, body.len());
        parse_feed(&body)
    }
}

pub fn parse_feed(document: &[u8]) -> Result<FetchedFeed> {
    let feed = feed_rs::parser::parse(document)?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let mut hrefs = entry.links.into_iter().map(|l| l.href);
            let link = hrefs.next();
            let content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .unwrap_or_default();

            FeedItem {
                guid: entry.id,
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                link,
                links: hrefs.collect(),
                content,
                published: entry.published.or(entry.updated),
            }
        })
        .collect();

    Ok(FetchedFeed {
        title: feed.title.map(|t| t.content),
        items,
    })
}
