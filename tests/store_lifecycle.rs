//! Integration tests for the Store on top of the SQLite key-value backend.
//!
//! Each test opens its own database file in a temp directory so reopen
//! behaviour can be checked against what actually reached disk.

use chrono::{TimeZone, Utc};
use feedkeep::backup::{Authenticator, CloudCredentials};
use feedkeep::content::OfflineContent;
use feedkeep::storage::{
    backup_key, Article, Database, KeyValueStore, Store, ARTICLES_KEY, FEEDS_KEY,
};
use pretty_assertions::assert_eq;

const FEED_URL: &str = "https://example.com/feed.xml";

async fn open_db(dir: &tempfile::TempDir) -> Database {
    let path = dir.path().join("feedkeep.db");
    Database::open(path.to_str().unwrap()).await.unwrap()
}

fn article(id: &str, title: &str) -> Article {
    Article {
        id: id.to_string(),
        feed_url: FEED_URL.to_string(),
        feed_title: "Example".to_string(),
        title: title.to_string(),
        url: format!("https://example.com/{id}"),
        published_date: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        ..Article::default()
    }
}

// ============================================================================
// Persistence across restarts
// ============================================================================

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let db = open_db(&dir).await;
        let mut store = Store::open(db.clone()).await;
        store.add_feed(FEED_URL, "Example").await.unwrap();
        store.add_articles(vec![article("a1", "One"), article("a2", "Two")]).await;
        assert!(store.mark_read("a1").await);
        store.add_to_read_later(article("a2", "Two")).await.unwrap();
        db.close().await;
    }

    let store = Store::open(open_db(&dir).await).await;
    assert_eq!(store.feeds().len(), 1);
    assert_eq!(store.feeds()[0].title, "Example");
    assert_eq!(store.articles().len(), 2);
    assert!(store.article("a1").unwrap().is_read);
    assert!(store.article("a1").unwrap().read_at.is_some());
    assert!(!store.article("a2").unwrap().is_read);
    assert_eq!(store.unread_count(), 1);
    assert!(store.is_in_read_later("a2"));
}

#[tokio::test]
async fn test_refetched_articles_keep_read_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(open_db(&dir).await).await;
    store.add_feed(FEED_URL, "Example").await.unwrap();
    store.add_articles(vec![article("a1", "One")]).await;
    store.mark_read("a1").await;
    let read_at = store.article("a1").unwrap().read_at;

    // Same ids arrive again with different content; the stored copy wins
    let added = store
        .add_articles(vec![article("a1", "One (edited)"), article("a3", "Three")])
        .await;

    assert_eq!(added.added, 1);
    assert!(added.persisted);
    assert_eq!(store.articles().len(), 2);
    let kept = store.article("a1").unwrap();
    assert_eq!(kept.title, "One");
    assert_eq!(kept.read_at, read_at);
}

#[tokio::test]
async fn test_mark_all_read_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(open_db(&dir).await).await;
    store.add_feed(FEED_URL, "Example").await.unwrap();
    store.add_articles(vec![article("a1", "One"), article("a2", "Two")]).await;

    assert!(store.mark_all_read().await);
    let first: Vec<_> = store.articles().iter().map(|a| a.read_at).collect();
    assert!(first.iter().all(|t| t.is_some() && *t == first[0]));

    assert!(store.mark_all_read().await);
    let second: Vec<_> = store.articles().iter().map(|a| a.read_at).collect();
    assert_eq!(first, second);
    assert_eq!(store.unread_count(), 0);
}

#[tokio::test]
async fn test_remove_feed_cascades_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir).await;
    let mut store = Store::open(db.clone()).await;
    store.add_feed(FEED_URL, "Example").await.unwrap();
    store.add_feed("https://other.example/rss", "Other").await.unwrap();
    store.add_articles(vec![article("a1", "One")]).await;
    store.add_to_read_later(article("a1", "One")).await.unwrap();

    assert!(store.remove_feed(FEED_URL).await);

    let reopened = Store::open(db).await;
    assert_eq!(reopened.feeds().len(), 1);
    assert!(reopened.articles().is_empty());
    assert!(reopened.is_in_read_later("a1"));
}

// ============================================================================
// Shadow backups
// ============================================================================

#[tokio::test]
async fn test_corrupt_primary_loads_empty_and_keeps_shadow() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir).await;

    let mut store = Store::open(db.clone()).await;
    store.add_feed(FEED_URL, "Example").await.unwrap();
    store.add_articles(vec![article("a1", "One")]).await;
    store.add_articles(vec![article("a2", "Two")]).await;

    let shadow = db.get(&backup_key(ARTICLES_KEY)).await.unwrap().unwrap();
    let shadowed: Vec<Article> = serde_json::from_str(&shadow).unwrap();
    assert_eq!(shadowed.len(), 1);

    // Simulate a torn write from a crashed process
    db.set(ARTICLES_KEY, "[{\"id\":\"a1\",\"feed_url").await.unwrap();

    let mut store = Store::open(db.clone()).await;
    assert_eq!(store.feeds().len(), 1);
    assert!(store.articles().is_empty());

    // Saving over a corrupt primary must not replace the good shadow
    store.add_articles(vec![article("a3", "Three")]).await;
    assert_eq!(db.get(&backup_key(ARTICLES_KEY)).await.unwrap().unwrap(), shadow);

    let keys = db.keys().await.unwrap();
    assert!(keys.contains(&FEEDS_KEY.to_string()));
    assert!(keys.contains(&ARTICLES_KEY.to_string()));
}

// ============================================================================
// Offline content and whole-collection backup
// ============================================================================

#[tokio::test]
async fn test_offline_content_persists() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir).await;
    let mut store = Store::open(db.clone()).await;
    store.add_feed(FEED_URL, "Example").await.unwrap();
    store.add_articles(vec![article("a1", "One")]).await;

    let content = OfflineContent {
        text: "Full article text".to_string(),
        html: "<p>Full article text</p>".to_string(),
        error: None,
    };
    assert!(store.save_offline("a1", content).await);

    let reopened = Store::open(db).await;
    let saved = reopened.article("a1").unwrap();
    assert!(saved.offline_cached);
    assert_eq!(saved.offline_content, "Full article text");
    assert!(saved.cached_at.is_some());
}

#[tokio::test]
async fn test_backup_then_restore_into_fresh_database() {
    let data_dir = tempfile::tempdir().unwrap();
    let backup_dir = tempfile::tempdir().unwrap();

    let mut store = Store::open(open_db(&data_dir).await).await;
    store.add_feed(FEED_URL, "Example").await.unwrap();
    store.add_articles(vec![article("a1", "One"), article("a2", "Two")]).await;
    store.mark_read("a2").await;
    store.add_to_read_later(article("a1", "One")).await.unwrap();

    let session = Authenticator::new(CloudCredentials::local(backup_dir.path()))
        .authenticate()
        .await
        .unwrap();
    session.backup(&store.snapshot()).await.unwrap();

    let fresh_dir = tempfile::tempdir().unwrap();
    let mut restored = Store::open(open_db(&fresh_dir).await).await;
    assert!(restored.restore_snapshot(session.restore().await.unwrap()).await);

    assert_eq!(restored.snapshot(), store.snapshot());
    assert!(restored.article("a2").unwrap().is_read);
}
