//! End-to-end ingestion: config-built components against a mock HTTP server.
//!
//! Covers subscribe through the relay chain, refresh, offline saving and the
//! OPML round trip, all landing in an in-memory SQLite store.

use feedkeep::config::Config;
use feedkeep::feed::{self, FetchError};
use feedkeep::storage::{Database, Store, MEMORY_PATH};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY: &str = "The city council approved the revised cycling plan on Thursday, \
    adding protected lanes along the river and a new bridge crossing that planners \
    say will cut commuting times for thousands of residents in the northern districts.";

fn rss(base: &str, guids: &[&str]) -> String {
    let items: String = guids
        .iter()
        .map(|guid| {
            format!(
                "<item><guid>{guid}</guid><title>Story {guid}</title>\
                 <link>{base}/post/{guid}</link>\
                 <description>Summary {guid}</description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>City News</title>{items}</channel></rss>"#
    )
}

fn config_with_relay(mock_server: &MockServer) -> Config {
    Config::parse(&format!(
        r#"
request_timeout_secs = 5
offline_max_retries = 0

[[relays]]
kind = "prefix"
base = "{}/raw?url="
"#,
        mock_server.uri()
    ))
    .unwrap()
}

async fn memory_store() -> Store<Database> {
    Store::open(Database::open(MEMORY_PATH).await.unwrap()).await
}

#[tokio::test]
async fn test_subscribe_through_relay_then_refresh() {
    let mock_server = MockServer::start().await;
    let feed_url = format!("{}/feed", mock_server.uri());

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/raw"))
        .and(query_param("url", feed_url.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&mock_server.uri(), &["1", "2"])))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/raw"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&mock_server.uri(), &["1", "2", "3"])))
        .mount(&mock_server)
        .await;

    let config = config_with_relay(&mock_server);
    let ingestor = config.ingestor(config.http_client().unwrap());
    let mut store = memory_store().await;

    let subscription = ingestor.subscribe(&mut store, &feed_url, None).await.unwrap();
    assert_eq!(subscription.feed.title, "City News");
    assert_eq!(subscription.added, 2);

    let summary = ingestor.refresh_all(&mut store).await;
    assert_eq!(summary.added, 1);
    assert_eq!(summary.message(), "Refreshed 1 feeds, 1 new article");
    assert_eq!(store.articles().len(), 3);
    assert_eq!(store.unread_count_for_feed(&feed_url), 3);
}

#[tokio::test]
async fn test_unreachable_feed_reports_every_attempt() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock_server)
        .await;

    let config = config_with_relay(&mock_server);
    let ingestor = config.ingestor(config.http_client().unwrap());

    let result = ingestor.fetch(&format!("{}/feed", mock_server.uri())).await;
    match result {
        Err(FetchError::AllSourcesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("expected AllSourcesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_save_article_for_offline_reading() {
    let mock_server = MockServer::start().await;
    let feed_url = format!("{}/feed", mock_server.uri());

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&mock_server.uri(), &["7"])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/post/7"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<html><body><nav>Home | Sports</nav><article><p>{BODY}</p></article>\
             <div class=\"ad-banner\">Buy now</div></body></html>"
        )))
        .mount(&mock_server)
        .await;

    let config = config_with_relay(&mock_server);
    let client = config.http_client().unwrap();
    let ingestor = config.ingestor(client.clone());
    let fetcher = config.offline_fetcher(client);
    let mut store = memory_store().await;

    ingestor.subscribe(&mut store, &feed_url, Some("Local")).await.unwrap();
    let article = store.articles()[0].clone();
    assert_eq!(article.feed_title, "Local");

    store.add_to_read_later(article.clone()).await.unwrap();
    let offline = fetcher.prepare(&article).await;
    assert_eq!(offline.error, None);
    assert!(store.save_offline(&article.id, offline).await);

    let saved = store.article(&article.id).unwrap();
    assert!(saved.offline_cached);
    assert_eq!(saved.offline_content, BODY);
    assert!(!saved.offline_html_content.contains("Buy now"));
    assert_eq!(store.read_later()[0].offline_content, BODY);
}

#[tokio::test]
async fn test_opml_export_then_import() {
    let mut source = memory_store().await;
    source.add_feed("https://example.com/feed.xml", "Example").await.unwrap();
    source.add_feed("https://news.example.org/rss", "News & Views").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subscriptions.opml");
    feed::export_to_file(source.feeds(), &path).unwrap();

    let feeds = feed::opml::read(&path).await.unwrap();
    let mut target = memory_store().await;
    target.add_feed("https://example.com/feed.xml", "Already here").await.unwrap();

    let summary = feed::import_into(&mut target, &feeds).await;
    assert_eq!((summary.added, summary.skipped), (1, 1));

    let titles: Vec<&str> = target.feeds().iter().map(|f| f.title.as_str()).collect();
    assert_eq!(titles, vec!["Already here", "News & Views"]);
}
