use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use feedkeep::backup::{Authenticator, CloudCredentials};
use feedkeep::config::Config;
use feedkeep::content;
use feedkeep::feed::{self, SubscribeError};
use feedkeep::storage::{Article, Database, DatabaseError, StoreError};

type Store = feedkeep::storage::Store<Database>;

/// Get the config directory path (~/.config/feedkeep/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedkeep"))
}

fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(config_dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "feedkeep", version, about = "Feed reader with offline articles and crash-safe storage")]
struct Args {
    /// Config file (default: ~/.config/feedkeep/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (default: ~/.config/feedkeep/feedkeep.db)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed
    Add {
        url: String,
        /// Display title (default: the feed's own title)
        #[arg(long)]
        title: Option<String>,
    },
    /// Unsubscribe from a feed and drop its articles
    Remove { url: String },
    /// List subscribed feeds with unread counts
    Feeds,
    /// List articles, newest first
    List {
        #[arg(long)]
        unread: bool,
        /// Only articles from this feed URL
        #[arg(long)]
        feed: Option<String>,
    },
    /// Print an article as plain text
    Show { id: String },
    /// Fetch new articles for every feed, or just one
    Refresh { url: Option<String> },
    /// Mark an article as read
    Read { id: String },
    /// Mark an article as unread
    Unread { id: String },
    /// Mark every article as read
    ReadAll,
    /// Delete all feeds and articles (the read-later list is kept)
    Clear,
    /// Download an article's page for offline reading
    Save { id: String },
    /// Manage the read-later list
    Later {
        #[command(subcommand)]
        action: LaterAction,
    },
    /// Import subscriptions from an OPML file
    Import { file: PathBuf },
    /// Export subscriptions to an OPML file
    Export { file: PathBuf },
    /// Back up everything to the configured target (or --dir)
    Backup {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Replace everything with the latest backup
    Restore {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum LaterAction {
    Add { id: String },
    Remove { id: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args.config.clone().unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match &args.db {
        Some(path) => path.clone(),
        None => {
            ensure_config_dir(&config_dir)?;
            config_dir.join("feedkeep.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another instance of feedkeep appears to be running. Please close it and try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let mut store = Store::open(db.clone()).await;
    let result = run(args.command, &config, &mut store).await;
    db.close().await;
    result
}

async fn run(command: Command, config: &Config, store: &mut Store) -> Result<()> {
    match command {
        Command::Add { url, title } => {
            let ingestor = config.ingestor(config.http_client()?);
            match ingestor.subscribe(store, &url, title.as_deref()).await {
                Ok(subscription) if !subscription.saved => {
                    eprintln!(
                        "Warning: subscribed to {} but its {} articles could not be saved",
                        subscription.feed.title, subscription.added
                    );
                }
                Ok(subscription) => println!(
                    "Subscribed to {} ({} articles)",
                    subscription.feed.title, subscription.added
                ),
                Err(SubscribeError::Store(StoreError::DuplicateFeed(url))) => {
                    println!("Already subscribed to {url}");
                }
                Err(e) => return Err(e).context("Failed to subscribe"),
            }
        }
        Command::Remove { url } => {
            let url = url.trim();
            if store.feed(url).is_none() {
                anyhow::bail!("Not subscribed to {url}");
            }
            if !store.remove_feed(url).await {
                anyhow::bail!("Failed to save after removing {url}");
            }
            println!("Removed {url}");
        }
        Command::Feeds => {
            for feed in store.feeds() {
                println!(
                    "{:>4}  {}  <{}>",
                    store.unread_count_for_feed(&feed.url),
                    feed.title,
                    feed.url
                );
            }
        }
        Command::List { unread, feed } => {
            let mut articles: Vec<&Article> = store
                .articles()
                .iter()
                .filter(|a| !unread || !a.is_read)
                .filter(|a| feed.as_deref().map_or(true, |url| a.feed_url == url.trim()))
                .collect();
            articles.sort_by(|a, b| b.published_date.cmp(&a.published_date));
            for article in articles {
                print_article_line(article);
            }
        }
        Command::Show { id } => {
            let article = store
                .article(&id)
                .or_else(|| store.read_later().iter().find(|a| a.id == id))
                .ok_or_else(|| anyhow::anyhow!("No article with id {id}"))?;
            print_article(article);
        }
        Command::Refresh { url } => {
            let ingestor = config.ingestor(config.http_client()?);
            match url {
                Some(url) => {
                    let feed = store
                        .feed(url.trim())
                        .cloned()
                        .ok_or_else(|| anyhow::anyhow!("Not subscribed to {}", url.trim()))?;
                    let added = ingestor
                        .refresh_one(store, &feed)
                        .await
                        .with_context(|| format!("Failed to refresh {}", feed.title))?;
                    println!("Refreshed {}, {} new articles", feed.title, added);
                }
                None => println!("{}", ingestor.refresh_all(store).await.message()),
            }
        }
        Command::Read { id } => {
            if !store.mark_read(&id).await {
                anyhow::bail!("Could not mark {id} as read");
            }
        }
        Command::Unread { id } => {
            if !store.mark_unread(&id).await {
                anyhow::bail!("Could not mark {id} as unread");
            }
        }
        Command::ReadAll => {
            if !store.mark_all_read().await {
                anyhow::bail!("Failed to save read state");
            }
            println!("All articles marked as read");
        }
        Command::Clear => {
            if !store.clear_all().await {
                anyhow::bail!("Failed to clear feeds and articles");
            }
            println!("Cleared feeds and articles");
        }
        Command::Save { id } => {
            let article = store
                .article(&id)
                .or_else(|| store.read_later().iter().find(|a| a.id == id))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("No article with id {id}"))?;
            let fetcher = config.offline_fetcher(config.http_client()?);
            let offline = fetcher.prepare(&article).await;
            if let Some(error) = &offline.error {
                eprintln!("Warning: no readable page content ({error}); saved the feed summary instead");
            }
            if !store.save_offline(&id, offline).await {
                anyhow::bail!("Failed to save offline content for {id}");
            }
            println!("Saved {} for offline reading", article.title);
        }
        Command::Later { action } => run_later(action, store).await?,
        Command::Import { file } => {
            let feeds = feed::opml::read(&file)
                .await
                .with_context(|| format!("Failed to read OPML file {}", file.display()))?;
            let summary = feed::import_into(store, &feeds).await;
            println!("Imported {} feeds ({} skipped)", summary.added, summary.skipped);
        }
        Command::Export { file } => {
            feed::export_to_file(store.feeds(), &file)
                .with_context(|| format!("Failed to export to {}", file.display()))?;
            println!("Exported {} feeds to {}", store.feeds().len(), file.display());
        }
        Command::Backup { dir } => {
            let session = Authenticator::new(backup_credentials(config, dir))
                .authenticate()
                .await
                .context("Backup target unavailable")?;
            let info = session.backup(&store.snapshot()).await.context("Backup failed")?;
            println!(
                "Backed up {} feeds, {} articles, {} read-later to {}",
                info.feeds,
                info.articles,
                info.read_later,
                info.path.display()
            );
        }
        Command::Restore { dir } => {
            let session = Authenticator::new(backup_credentials(config, dir))
                .authenticate()
                .await
                .context("Backup target unavailable")?;
            let snapshot = session.restore().await.context("Restore failed")?;
            if !store.restore_snapshot(snapshot).await {
                anyhow::bail!("Restored data could not be saved completely");
            }
            println!(
                "Restored {} feeds, {} articles, {} read-later",
                store.feeds().len(),
                store.articles().len(),
                store.read_later().len()
            );
        }
    }
    Ok(())
}

async fn run_later(action: LaterAction, store: &mut Store) -> Result<()> {
    match action {
        LaterAction::Add { id } => {
            let article = store
                .article(&id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("No article with id {id}"))?;
            store
                .add_to_read_later(article)
                .await
                .context("Failed to add to read later")?;
        }
        LaterAction::Remove { id } => {
            if !store
                .remove_from_read_later(&id)
                .await
                .context("Failed to remove from read later")?
            {
                anyhow::bail!("{id} is not in the read later list");
            }
        }
        LaterAction::List => {
            for article in store.read_later() {
                print_article_line(article);
            }
        }
    }
    Ok(())
}

fn backup_credentials(config: &Config, dir: Option<PathBuf>) -> CloudCredentials {
    match dir {
        Some(dir) => CloudCredentials::local(dir),
        None => config.cloud_credentials(),
    }
}

fn print_article_line(article: &Article) {
    let marker = if article.is_read { ' ' } else { '*' };
    let date = article
        .published_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "----------".to_string());
    let offline = if article.offline_cached { " [offline]" } else { "" };
    println!(
        "{marker} {}  {date}  {}: {}{offline}",
        article.id, article.feed_title, article.title
    );
}

fn print_article(article: &Article) {
    let body = if article.offline_cached && !article.offline_content.trim().is_empty() {
        article.offline_content.clone()
    } else if article.content.trim().is_empty() {
        article.description.clone()
    } else {
        article.content.clone()
    };
    let direction = content::detect(&format!("{} {}", article.title, body));

    println!("{}", article.title);
    println!("{} | {}", article.feed_title, article.url);
    if !article.authors.is_empty() {
        println!("By {}", article.authors.join(", "));
    }
    println!(
        "Direction: {} ({:?}, {:.0}% RTL)",
        direction.code,
        direction.text_alignment(),
        direction.rtl_percentage
    );
    println!();
    println!("{body}");
}
