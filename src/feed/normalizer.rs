use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

use super::resolver::{ConvertedFeed, FeedDocument, FetchError};
use crate::content::Sanitizer;
use crate::storage::Article;
use crate::util::hash_id;

pub const UNTITLED: &str = "No Title";

static IMG_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).unwrap());

/// A feed document reduced to display metadata and articles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedFeed {
    pub title: String,
    pub description: String,
    pub articles: Vec<Article>,
}

/// An item in a feed-to-JSON converter response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConvertedItem {
    title: String,
    description: String,
    content: String,
    link: String,
    #[serde(rename = "pubDate")]
    pub_date: String,
    author: String,
    categories: Vec<String>,
    enclosure: ConvertedEnclosure,
    thumbnail: String,
    image: Option<ImageField>,
    guid: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConvertedEnclosure {
    link: String,
    #[serde(rename = "type")]
    media_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ImageField {
    Url(String),
    Object { url: String },
}

/// Candidate image sources of one item, in cascade order.
#[derive(Default)]
struct ImageSources<'a> {
    explicit: Option<&'a str>,
    object: Option<&'a str>,
    /// `(url, media type)` pairs
    enclosures: Vec<(&'a str, &'a str)>,
    content: &'a str,
    description: &'a str,
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

impl ImageSources<'_> {
    /// Explicit image, image object, first image enclosure, then the first
    /// `<img>` in the content and the description.
    fn resolve(&self) -> Option<String> {
        self.explicit
            .and_then(non_empty)
            .or_else(|| self.object.and_then(non_empty))
            .or_else(|| {
                self.enclosures
                    .iter()
                    .find(|(url, media_type)| {
                        media_type.to_ascii_lowercase().starts_with("image/") && non_empty(url).is_some()
                    })
                    .map(|(url, _)| url.trim())
            })
            .or_else(|| first_img_src(self.content))
            .or_else(|| first_img_src(self.description))
            .map(str::to_string)
    }
}

fn first_img_src(html: &str) -> Option<&str> {
    IMG_SRC
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|src| !src.is_empty())
}

/// Parses converter dates: RFC 3339, RFC 2822, or `YYYY-MM-DD HH:MM:SS` in UTC.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Turns feed documents into [`Article`] records.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    sanitizer: Sanitizer,
}

impl Normalizer {
    pub fn new(sanitizer: Sanitizer) -> Self {
        Self { sanitizer }
    }

    /// Normalizes `document`, retrieved from `source_url`, into articles.
    ///
    /// Article ids hash `source_url` with the item's guid (or link). Items
    /// with neither are keyed by position and ingestion time, so they are
    /// unique within this batch only.
    ///
    /// # Errors
    ///
    /// [`FetchError::Parse`] when an XML document is not RSS, Atom or JSON Feed.
    pub fn normalize(&self, document: &FeedDocument, source_url: &str) -> Result<NormalizedFeed, FetchError> {
        let ingested_at = Utc::now();
        match document {
            FeedDocument::Xml(bytes) => self.normalize_xml(bytes, source_url, ingested_at),
            FeedDocument::Converted(converted) => Ok(self.normalize_converted(converted, source_url, ingested_at)),
        }
    }

    fn normalize_xml(
        &self,
        bytes: &[u8],
        source_url: &str,
        ingested_at: DateTime<Utc>,
    ) -> Result<NormalizedFeed, FetchError> {
        let feed = feed_rs::parser::parse(bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

        let title = feed
            .title
            .map(|t| self.sanitizer.to_plain_text(&t.content))
            .unwrap_or_default();
        let description = feed
            .description
            .map(|d| self.sanitizer.to_plain_text(&d.content))
            .unwrap_or_default();

        let articles = feed
            .entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let link = entry.links.first().map(|l| l.href.clone()).unwrap_or_default();
                let summary_html = entry.summary.map(|s| s.content).unwrap_or_default();
                let content_html = entry
                    .content
                    .and_then(|c| c.body)
                    .filter(|body| !body.trim().is_empty())
                    .unwrap_or_else(|| summary_html.clone());

                let thumbnail = entry
                    .media
                    .iter()
                    .flat_map(|m| m.thumbnails.iter())
                    .map(|t| t.image.uri.as_str())
                    .next();
                let enclosures = entry
                    .media
                    .iter()
                    .flat_map(|m| m.content.iter())
                    .filter_map(|c| {
                        let url = c.url.as_ref()?.as_str();
                        let media_type = c.content_type.as_ref().map(|m| m.as_str()).unwrap_or("");
                        Some((url, media_type))
                    })
                    .collect();
                let image_url = ImageSources {
                    explicit: thumbnail,
                    object: None,
                    enclosures,
                    content: &content_html,
                    description: &summary_html,
                }
                .resolve();

                let guid = if entry.id.trim().is_empty() { link.as_str() } else { entry.id.as_str() };
                let id = article_id(source_url, guid, index, ingested_at);

                Article {
                    id,
                    feed_url: source_url.to_string(),
                    feed_title: title.clone(),
                    title: self.title_or_default(entry.title.map(|t| t.content).as_deref()),
                    description: self.sanitizer.to_plain_text(&summary_html),
                    content: self.sanitizer.to_plain_text(&content_html),
                    html_content: self.sanitizer.clean(&content_html),
                    url: link,
                    published_date: entry.published.or(entry.updated),
                    authors: entry
                        .authors
                        .into_iter()
                        .map(|p| p.name.trim().to_string())
                        .filter(|name| !name.is_empty())
                        .collect(),
                    categories: entry
                        .categories
                        .into_iter()
                        .map(|c| c.label.unwrap_or(c.term).trim().to_string())
                        .filter(|c| !c.is_empty())
                        .collect(),
                    image_url,
                    ..Article::default()
                }
            })
            .collect();

        Ok(NormalizedFeed {
            title,
            description,
            articles,
        })
    }

    fn normalize_converted(
        &self,
        converted: &ConvertedFeed,
        source_url: &str,
        ingested_at: DateTime<Utc>,
    ) -> NormalizedFeed {
        let title = self.sanitizer.to_plain_text(&converted.feed.title);
        let description = self.sanitizer.to_plain_text(&converted.feed.description);

        let articles = converted
            .items
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let item: ConvertedItem = serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                    tracing::warn!(feed = %source_url, index, error = %e, "Undecodable item, using defaults");
                    ConvertedItem::default()
                });

                let content_html = if item.content.trim().is_empty() {
                    item.description.as_str()
                } else {
                    item.content.as_str()
                };
                let (explicit, object) = match &item.image {
                    Some(ImageField::Url(url)) => (non_empty(&item.thumbnail).or(Some(url.as_str())), None),
                    Some(ImageField::Object { url }) => (Some(item.thumbnail.as_str()), Some(url.as_str())),
                    None => (Some(item.thumbnail.as_str()), None),
                };
                let image_url = ImageSources {
                    explicit,
                    object,
                    enclosures: vec![(item.enclosure.link.as_str(), item.enclosure.media_type.as_str())],
                    content: content_html,
                    description: &item.description,
                }
                .resolve();

                let guid = non_empty(&item.guid).unwrap_or(item.link.trim());
                let author = item.author.trim();

                Article {
                    id: article_id(source_url, guid, index, ingested_at),
                    feed_url: source_url.to_string(),
                    feed_title: title.clone(),
                    title: self.title_or_default(Some(&item.title)),
                    description: self.sanitizer.to_plain_text(&item.description),
                    content: self.sanitizer.to_plain_text(content_html),
                    html_content: self.sanitizer.clean(content_html),
                    url: item.link.trim().to_string(),
                    published_date: parse_date(&item.pub_date),
                    authors: if author.is_empty() { Vec::new() } else { vec![author.to_string()] },
                    categories: item
                        .categories
                        .iter()
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .collect(),
                    image_url,
                    ..Article::default()
                }
            })
            .collect();

        NormalizedFeed {
            title,
            description,
            articles,
        }
    }

    fn title_or_default(&self, raw: Option<&str>) -> String {
        let title = raw.map(|t| self.sanitizer.to_plain_text(t)).unwrap_or_default();
        if title.is_empty() {
            UNTITLED.to_string()
        } else {
            title
        }
    }
}

/// `hash(source | guid)`, or `hash(source | index | ingestion time)` when the
/// item carries no guid or link.
fn article_id(source_url: &str, guid: &str, index: usize, ingested_at: DateTime<Utc>) -> String {
    if guid.is_empty() {
        let nanos = ingested_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| ingested_at.timestamp_micros());
        hash_id(&[source_url, &index.to_string(), &nanos.to_string()])
    } else {
        hash_id(&[source_url, guid])
    }
}
