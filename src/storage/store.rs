use chrono::Utc;
use std::collections::HashSet;

use super::backup::BackupStorage;
use super::kv::KeyValueStore;
use super::types::{Article, ArticleMerge, Feed, ReadLaterError, Snapshot, StoreError};
use crate::content::OfflineContent;
use crate::util::{new_feed_id, validate_url};

pub const FEEDS_KEY: &str = "feeds";
pub const ARTICLES_KEY: &str = "articles";
pub const READ_LATER_KEY: &str = "read_later";

/// Authoritative in-memory collections mirrored to a [`KeyValueStore`].
///
/// Every mutation updates memory first, then persists the affected
/// collection. Feed and article writes that fail are logged and reported
/// through the `bool` return; memory is not rolled back and the next
/// successful write reconciles storage. Adding a feed and read-later
/// writes are all or nothing: a failed save leaves both memory and storage
/// unchanged.
pub struct Store<S> {
    storage: BackupStorage<S>,
    feeds: Vec<Feed>,
    articles: Vec<Article>,
    read_later: Vec<Article>,
}

/// `is_read` mirrors `read_at`.
fn settle_read_state(article: &mut Article) {
    article.is_read = article.read_at.is_some();
}

/// Drops repeated feed urls and article ids (first wins) and articles whose
/// feed is missing. Returns the number of articles dropped.
fn reconcile(feeds: &mut Vec<Feed>, articles: &mut Vec<Article>) -> usize {
    let mut urls = HashSet::new();
    feeds.retain(|f| urls.insert(f.url.clone()));

    let before = articles.len();
    let mut ids = HashSet::new();
    articles.retain(|a| urls.contains(&a.feed_url) && ids.insert(a.id.clone()));
    before - articles.len()
}

fn dedup_by_id(articles: &mut Vec<Article>) {
    let mut ids = HashSet::new();
    articles.retain(|a| ids.insert(a.id.clone()));
}

impl<S: KeyValueStore> Store<S> {
    /// Loads all collections. Missing or corrupt collections start empty.
    pub async fn open(storage: S) -> Self {
        let storage = BackupStorage::new(storage);
        let mut feeds: Vec<Feed> = storage.load(FEEDS_KEY).await.unwrap_or_default();
        let mut articles: Vec<Article> = storage.load(ARTICLES_KEY).await.unwrap_or_default();
        let mut read_later: Vec<Article> = storage.load(READ_LATER_KEY).await.unwrap_or_default();

        let dropped = reconcile(&mut feeds, &mut articles);
        if dropped > 0 {
            tracing::warn!(dropped, "Ignoring stored articles without a feed");
        }
        dedup_by_id(&mut read_later);

        articles.iter_mut().for_each(settle_read_state);
        read_later.iter_mut().for_each(settle_read_state);

        tracing::debug!(
            feeds = feeds.len(),
            articles = articles.len(),
            read_later = read_later.len(),
            "Store loaded"
        );

        Self {
            storage,
            feeds,
            articles,
            read_later,
        }
    }

    pub fn storage(&self) -> &S {
        self.storage.inner()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn feeds(&self) -> &[Feed] {
        &self.feeds
    }

    pub fn feed(&self, url: &str) -> Option<&Feed> {
        self.feeds.iter().find(|f| f.url == url)
    }

    pub fn articles(&self) -> &[Article] {
        &self.articles
    }

    pub fn article(&self, id: &str) -> Option<&Article> {
        self.articles.iter().find(|a| a.id == id)
    }

    pub fn articles_for_feed<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a Article> + 'a {
        self.articles.iter().filter(move |a| a.feed_url == url)
    }

    pub fn unread_count(&self) -> usize {
        self.articles.iter().filter(|a| !a.is_read).count()
    }

    pub fn unread_count_for_feed(&self, url: &str) -> usize {
        self.articles_for_feed(url).filter(|a| !a.is_read).count()
    }

    pub fn read_later(&self) -> &[Article] {
        &self.read_later
    }

    pub fn is_in_read_later(&self, id: &str) -> bool {
        self.read_later.iter().any(|a| a.id == id)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            feeds: self.feeds.clone(),
            articles: self.articles.clone(),
            read_later: self.read_later.clone(),
        }
    }

    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribes to `url`. An empty `title` falls back to the URL's host.
    ///
    /// The feed is only kept when the feed list was saved.
    pub async fn add_feed(&mut self, url: &str, title: &str) -> Result<Feed, StoreError> {
        let parsed = validate_url(url)?;
        let url = url.trim();

        if self.feed(url).is_some() {
            return Err(StoreError::DuplicateFeed(url.to_string()));
        }

        let title = match title.trim() {
            "" => parsed.host_str().unwrap_or(url).to_string(),
            title => title.to_string(),
        };
        let now = Utc::now();
        let feed = Feed {
            id: new_feed_id(url, now),
            url: url.to_string(),
            title,
            added_at: now,
        };

        self.feeds.push(feed.clone());
        if let Err(e) = self.storage.save(FEEDS_KEY, &self.feeds).await {
            self.feeds.pop();
            tracing::warn!(key = FEEDS_KEY, feed = %feed.url, error = %e, "Failed to persist new feed");
            return Err(e.into());
        }
        tracing::info!(feed = %feed.url, "Feed added");
        Ok(feed)
    }

    /// Unsubscribes from `url`, dropping its articles. Read-later copies are
    /// kept. Returns whether the change was persisted.
    pub async fn remove_feed(&mut self, url: &str) -> bool {
        let before = self.feeds.len();
        self.feeds.retain(|f| f.url != url);
        if self.feeds.len() == before {
            tracing::debug!(feed = %url, "Feed not subscribed, nothing to remove");
            return true;
        }

        let articles_before = self.articles.len();
        self.articles.retain(|a| a.feed_url != url);
        tracing::info!(
            feed = %url,
            articles = articles_before - self.articles.len(),
            "Feed removed"
        );

        // Articles first: stored articles must never outlive their stored feed
        if !self.persist_articles().await {
            return false;
        }
        self.persist_feeds().await
    }

    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Adds articles whose id is not yet stored; existing articles win.
    ///
    /// Articles for feeds that are not subscribed are dropped.
    pub async fn add_articles(&mut self, batch: impl IntoIterator<Item = Article>) -> ArticleMerge {
        let feed_urls: HashSet<String> = self.feeds.iter().map(|f| f.url.clone()).collect();
        let mut seen: HashSet<String> = self.articles.iter().map(|a| a.id.clone()).collect();
        let mut added = 0;

        for mut article in batch {
            if !feed_urls.contains(&article.feed_url) {
                tracing::warn!(feed = %article.feed_url, article = %article.id, "Dropping article for unknown feed");
                continue;
            }
            if !seen.insert(article.id.clone()) {
                continue;
            }
            settle_read_state(&mut article);
            self.articles.push(article);
            added += 1;
        }

        let persisted = added == 0 || self.persist_articles().await;
        ArticleMerge { added, persisted }
    }

    /// Marks an article read. Returns `false` when the article is unknown or
    /// the change could not be persisted.
    pub async fn mark_read(&mut self, id: &str) -> bool {
        let Some(article) = self.articles.iter_mut().find(|a| a.id == id) else {
            tracing::debug!(article = %id, "mark_read: unknown article");
            return false;
        };
        if article.is_read {
            return true;
        }
        article.is_read = true;
        article.read_at = Some(Utc::now());
        self.persist_articles().await
    }

    /// Marks an article unread, clearing its read timestamp.
    pub async fn mark_unread(&mut self, id: &str) -> bool {
        let Some(article) = self.articles.iter_mut().find(|a| a.id == id) else {
            tracing::debug!(article = %id, "mark_unread: unknown article");
            return false;
        };
        if !article.is_read {
            return true;
        }
        article.is_read = false;
        article.read_at = None;
        self.persist_articles().await
    }

    /// Marks every unread article read with one shared timestamp.
    pub async fn mark_all_read(&mut self) -> bool {
        let now = Utc::now();
        let mut changed = 0;
        for article in self.articles.iter_mut().filter(|a| !a.is_read) {
            article.is_read = true;
            article.read_at = Some(now);
            changed += 1;
        }

        if changed == 0 {
            return true;
        }
        tracing::info!(count = changed, "Marked all articles read");
        self.persist_articles().await
    }

    /// Empties feeds and articles. The read-later list is kept.
    pub async fn clear_all(&mut self) -> bool {
        self.feeds.clear();
        self.articles.clear();
        tracing::info!("Cleared all feeds and articles");

        let feeds_saved = self.persist_feeds().await;
        let articles_saved = self.persist_articles().await;
        feeds_saved && articles_saved
    }

    /// Stores offline reader content on the article and on its read-later
    /// copy. Returns `false` when the article is in neither collection or a
    /// write failed.
    pub async fn save_offline(&mut self, id: &str, content: OfflineContent) -> bool {
        let now = Utc::now();
        let apply = |article: &mut Article| {
            article.offline_cached = true;
            article.offline_content = content.text.clone();
            article.offline_html_content = content.html.clone();
            article.offline_error = content.error.clone();
            article.cached_at = Some(now);
        };

        let in_articles = self.articles.iter_mut().find(|a| a.id == id).map(&apply).is_some();
        let in_read_later = self.read_later.iter_mut().find(|a| a.id == id).map(&apply).is_some();

        if !in_articles && !in_read_later {
            tracing::debug!(article = %id, "save_offline: unknown article");
            return false;
        }

        let mut saved = true;
        if in_articles {
            saved &= self.persist_articles().await;
        }
        if in_read_later {
            if let Err(e) = self.storage.save(READ_LATER_KEY, &self.read_later).await {
                tracing::warn!(key = READ_LATER_KEY, error = %e, "Failed to persist offline content");
                saved = false;
            }
        }
        saved
    }

    /// Replaces every collection with `snapshot`.
    ///
    /// Articles whose feed is not part of the snapshot are dropped, as are
    /// repeated feed urls and article ids (the first copy wins).
    pub async fn restore_snapshot(&mut self, snapshot: Snapshot) -> bool {
        let Snapshot {
            mut feeds,
            mut articles,
            mut read_later,
        } = snapshot;

        reconcile(&mut feeds, &mut articles);
        dedup_by_id(&mut read_later);
        articles.iter_mut().for_each(settle_read_state);
        read_later.iter_mut().for_each(settle_read_state);

        self.feeds = feeds;
        self.articles = articles;
        self.read_later = read_later;

        let feeds_saved = self.persist_feeds().await;
        let articles_saved = self.persist_articles().await;
        let read_later_saved = match self.storage.save(READ_LATER_KEY, &self.read_later).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = READ_LATER_KEY, error = %e, "Failed to persist read later list");
                false
            }
        };
        feeds_saved && articles_saved && read_later_saved
    }

    // ========================================================================
    // Read Later
    // ========================================================================

    pub async fn add_to_read_later(&mut self, article: Article) -> Result<(), ReadLaterError> {
        if self.is_in_read_later(&article.id) {
            return Err(ReadLaterError::AlreadyExists(article.id));
        }

        self.read_later.push(article);
        if let Err(e) = self.storage.save(READ_LATER_KEY, &self.read_later).await {
            self.read_later.pop();
            return Err(e.into());
        }
        Ok(())
    }

    /// Returns `Ok(false)` when the article was not in the list.
    pub async fn remove_from_read_later(&mut self, id: &str) -> Result<bool, ReadLaterError> {
        let Some(index) = self.read_later.iter().position(|a| a.id == id) else {
            return Ok(false);
        };

        let removed = self.read_later.remove(index);
        if let Err(e) = self.storage.save(READ_LATER_KEY, &self.read_later).await {
            self.read_later.insert(index, removed);
            return Err(e.into());
        }
        Ok(true)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    async fn persist_feeds(&self) -> bool {
        match self.storage.save(FEEDS_KEY, &self.feeds).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = FEEDS_KEY, error = %e, "Failed to persist feeds");
                false
            }
        }
    }

    async fn persist_articles(&self) -> bool {
        match self.storage.save(ARTICLES_KEY, &self.articles).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = ARTICLES_KEY, error = %e, "Failed to persist articles");
                false
            }
        }
    }
}
