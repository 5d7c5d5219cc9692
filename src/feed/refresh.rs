use thiserror::Error;

use super::normalizer::{NormalizedFeed, Normalizer};
use super::resolver::{FetchError, Resolver};
use crate::storage::{Feed, KeyValueStore, Store, StoreError};

/// Errors that can occur while subscribing to a feed.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors that can occur while refreshing one feed.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0} new articles could not be saved")]
    NotSaved(usize),
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub feed: Feed,
    /// Number of articles added by the initial fetch
    pub added: usize,
    /// Whether those articles reached storage
    pub saved: bool,
}

/// Outcome of refreshing every subscribed feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub total: usize,
    pub refreshed: usize,
    pub added: usize,
    /// `(feed title, error)` for each feed that failed
    pub failures: Vec<(String, String)>,
}

impl RefreshSummary {
    /// One user-facing line covering the whole refresh.
    pub fn message(&self) -> String {
        let articles = match self.added {
            1 => "1 new article".to_string(),
            n => format!("{n} new articles"),
        };
        if self.failures.is_empty() {
            return format!("Refreshed {} feeds, {}", self.refreshed, articles);
        }

        let failed: Vec<String> = self
            .failures
            .iter()
            .map(|(title, error)| format!("{title} ({error})"))
            .collect();
        format!(
            "Refreshed {} of {} feeds, {}; {} failed: {}",
            self.refreshed,
            self.total,
            articles,
            self.failures.len(),
            failed.join(", ")
        )
    }
}

/// Resolve + normalize + store.
#[derive(Debug, Clone)]
pub struct Ingestor {
    resolver: Resolver,
    normalizer: Normalizer,
}

impl Ingestor {
    pub fn new(resolver: Resolver, normalizer: Normalizer) -> Self {
        Self {
            resolver,
            normalizer,
        }
    }

    /// Retrieves and normalizes the feed at `url` without storing it.
    pub async fn fetch(&self, url: &str) -> Result<NormalizedFeed, FetchError> {
        let url = url.trim();
        let document = self.resolver.resolve(url).await?;
        self.normalizer.normalize(&document, url)
    }

    /// Fetches `url` and subscribes to it with its first batch of articles.
    ///
    /// Nothing is stored when the fetch fails. An empty `title` uses the
    /// feed's own title.
    pub async fn subscribe<S: KeyValueStore>(
        &self,
        store: &mut Store<S>,
        url: &str,
        title: Option<&str>,
    ) -> Result<Subscription, SubscribeError> {
        let url = url.trim();
        if store.feed(url).is_some() {
            return Err(StoreError::DuplicateFeed(url.to_string()).into());
        }

        let normalized = self.fetch(url).await?;
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&normalized.title);
        let feed = store.add_feed(url, title).await?;

        let merge = store
            .add_articles(normalized.articles.into_iter().map(|mut article| {
                article.feed_title = feed.title.clone();
                article
            }))
            .await;

        tracing::info!(feed = %feed.url, added = merge.added, saved = merge.persisted, "Subscribed");
        Ok(Subscription {
            feed,
            added: merge.added,
            saved: merge.persisted,
        })
    }

    /// Fetches one subscribed feed and stores its new articles.
    ///
    /// New articles that could not be saved stay in the Store's memory but
    /// are reported as [`RefreshError::NotSaved`].
    pub async fn refresh_one<S: KeyValueStore>(
        &self,
        store: &mut Store<S>,
        feed: &Feed,
    ) -> Result<usize, RefreshError> {
        let normalized = self.fetch(&feed.url).await?;
        let merge = store
            .add_articles(normalized.articles.into_iter().map(|mut article| {
                article.feed_title = feed.title.clone();
                article
            }))
            .await;

        if !merge.persisted {
            return Err(RefreshError::NotSaved(merge.added));
        }
        tracing::debug!(feed = %feed.url, added = merge.added, "Feed refreshed");
        Ok(merge.added)
    }

    /// Refreshes every subscribed feed, one after another.
    ///
    /// A failing feed is logged and recorded in the summary; the remaining
    /// feeds are still refreshed.
    pub async fn refresh_all<S: KeyValueStore>(&self, store: &mut Store<S>) -> RefreshSummary {
        let feeds = store.feeds().to_vec();
        let mut summary = RefreshSummary {
            total: feeds.len(),
            ..RefreshSummary::default()
        };

        for feed in &feeds {
            match self.refresh_one(store, feed).await {
                Ok(added) => {
                    summary.refreshed += 1;
                    summary.added += added;
                }
                Err(e) => {
                    tracing::warn!(feed = %feed.url, error = %e, "Feed refresh failed");
                    summary.failures.push((feed.title.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            refreshed = summary.refreshed,
            failed = summary.failures.len(),
            added = summary.added,
            "Refresh complete"
        );
        summary
    }
}
