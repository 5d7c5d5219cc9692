use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::storage::{Feed, KeyValueStore, Store, StoreError};
use crate::util::validate_public_url;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur during OPML import/export.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Failed to write OPML: {0}")]
    Write(String),

    #[error("OPML file error: {0}")]
    Io(#[from] std::io::Error),
}

/// A subscription read from an `<outline xmlUrl=...>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlFeed {
    /// `title`, else `text`, else the feed URL
    pub title: String,
    pub xml_url: String,
}

/// Outcome of importing an OPML subscription list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: usize,
    pub skipped: usize,
}

/// Reads and parses the OPML file at `path`.
pub async fn read(path: &Path) -> Result<Vec<OpmlFeed>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml(&content)
}

/// Extracts subscriptions from OPML content, at any nesting depth.
///
/// Feeds whose URL is not public http(s) (localhost, private ranges, other
/// schemes) are skipped with a warning.
///
/// quick-xml never expands `<!ENTITY>` declarations; custom entity
/// references fail to unescape instead.
pub fn parse_opml(content: &str) -> Result<Vec<OpmlFeed>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                if let Some(feed) = parse_outline(&e, &reader)? {
                    feeds.push(feed);
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                if let Some(feed) = parse_outline(&e, &reader)? {
                    feeds.push(feed);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(feeds)
}

fn parse_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Option<OpmlFeed>, OpmlError> {
    let mut xml_url = None;
    let mut title = None;
    let mut text = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = || {
            attr.decode_and_unescape_value(reader.decoder())
                .map(|v| v.trim().to_string())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))
        };
        match attr.key.as_ref() {
            b"xmlUrl" => xml_url = Some(value()?),
            b"title" => title = Some(value()?),
            b"text" => text = Some(value()?),
            _ => {}
        }
    }

    let Some(url) = xml_url else {
        return Ok(None);
    };

    // SEC-002: Validate URL before accepting
    if let Err(e) = validate_public_url(&url) {
        tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
        return Ok(None);
    }

    let title = title
        .filter(|t| !t.is_empty())
        .or(text.filter(|t| !t.is_empty()))
        .unwrap_or_else(|| url.clone());
    Ok(Some(OpmlFeed { title, xml_url: url }))
}

/// Subscribes to every OPML feed not already in `store`, without fetching.
pub async fn import_into<S: KeyValueStore>(store: &mut Store<S>, feeds: &[OpmlFeed]) -> ImportSummary {
    let mut summary = ImportSummary::default();
    for feed in feeds {
        match store.add_feed(&feed.xml_url, &feed.title).await {
            Ok(_) => summary.added += 1,
            Err(StoreError::DuplicateFeed(_)) => summary.skipped += 1,
            Err(e) => {
                tracing::warn!(feed = %feed.xml_url, error = %e, "Skipping OPML feed");
                summary.skipped += 1;
            }
        }
    }
    summary
}

fn write_event(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<(), OpmlError> {
    writer
        .write_event(event)
        .map_err(|e| OpmlError::Write(e.to_string()))
}

/// Renders subscriptions as an OPML 2.0 document.
pub fn export_opml(feeds: &[Feed]) -> Result<String, OpmlError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    write_event(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    write_event(&mut writer, Event::Start(opml))?;

    write_event(&mut writer, Event::Start(BytesStart::new("head")))?;
    write_event(&mut writer, Event::Start(BytesStart::new("title")))?;
    write_event(&mut writer, Event::Text(BytesText::new("feedkeep subscriptions")))?;
    write_event(&mut writer, Event::End(BytesEnd::new("title")))?;
    write_event(&mut writer, Event::End(BytesEnd::new("head")))?;

    write_event(&mut writer, Event::Start(BytesStart::new("body")))?;
    for feed in feeds {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("text", feed.title.as_str()));
        outline.push_attribute(("title", feed.title.as_str()));
        outline.push_attribute(("xmlUrl", feed.url.as_str()));
        write_event(&mut writer, Event::Empty(outline))?;
    }
    write_event(&mut writer, Event::End(BytesEnd::new("body")))?;
    write_event(&mut writer, Event::End(BytesEnd::new("opml")))?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).map_err(|e| OpmlError::Write(e.to_string()))
}

/// Writes the OPML export to `path` atomically (temp file, sync, rename).
pub fn export_to_file(feeds: &[Feed], path: &Path) -> Result<(), OpmlError> {
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    let content = export_opml(feeds)?;

    // SEC-009: Randomized temp filename to prevent TOCTOU race conditions
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)?;

    if let Err(e) = file.write_all(content.as_bytes()).and_then(|_| file.sync_all()) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    drop(file);

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::Utc;

    fn feed(title: &str, url: &str) -> Feed {
        Feed {
            id: url.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            added_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_nested_outlines() {
        let content = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Test Feeds</title></head>
  <body>
    <outline text="Blogs" title="Blogs">
      <outline type="rss" text="Example Blog" title="Example Blog" xmlUrl="https://example.com/feed.xml"/>
      <outline type="rss" text="Text Only" xmlUrl="https://textonly.com/rss"/>
    </outline>
    <outline type="rss" xmlUrl="https://notitle.com/feed"/>
  </body>
</opml>"#;

        let feeds = parse_opml(content).unwrap();
        assert_eq!(
            feeds,
            vec![
                OpmlFeed {
                    title: "Example Blog".to_string(),
                    xml_url: "https://example.com/feed.xml".to_string(),
                },
                OpmlFeed {
                    title: "Text Only".to_string(),
                    xml_url: "https://textonly.com/rss".to_string(),
                },
                OpmlFeed {
                    title: "https://notitle.com/feed".to_string(),
                    xml_url: "https://notitle.com/feed".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_skip_non_public_feeds() {
        let content = r#"<?xml version="1.0"?>
    <opml version="2.0"><body>
        <outline xmlUrl="https://valid.com/feed"/>
        <outline xmlUrl="http://192.168.1.1/feed"/>
        <outline xmlUrl="http://localhost/feed"/>
        <outline xmlUrl="file:///etc/passwd"/>
    </body></opml>"#;

        let feeds = parse_opml(content).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].xml_url, "https://valid.com/feed");
    }

    #[test]
    fn test_malformed_xml_error() {
        assert!(matches!(
            parse_opml("<opml><body><outline xmlUrl=\"x\"></body>"),
            Err(OpmlError::XmlParse(_))
        ));
    }

    #[test]
    fn test_internal_entity_not_expanded() {
        let content = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY internal "EXPANDED_VALUE">]>
<opml version="2.0">
    <body>
        <outline text="&internal;" xmlUrl="https://example.com/feed.xml"/>
    </body>
</opml>"#;

        if let Ok(feeds) = parse_opml(content) {
            assert!(feeds.iter().all(|f| !f.title.contains("EXPANDED_VALUE")));
        }
    }

    #[test]
    fn test_deeply_nested_opml_rejected() {
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        for _ in 0..100 {
            opml.push_str(r#"<outline text="level">"#);
        }
        for _ in 0..100 {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        assert!(matches!(parse_opml(&opml), Err(OpmlError::MaxDepthExceeded(50))));
    }

    #[test]
    fn test_export_escapes_and_parses_back() {
        let feeds = vec![
            feed("Feed with <special> & \"chars\"", "https://example.com/feed?a=1&b=2"),
            feed("Plain", "https://plain.example.com/rss"),
        ];

        let exported = export_opml(&feeds).unwrap();
        assert!(exported.starts_with("<?xml"));
        let parsed = parse_opml(&exported).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].title, "Feed with <special> & \"chars\"");
        assert_eq!(parsed[0].xml_url, "https://example.com/feed?a=1&b=2");
    }

    #[test]
    fn test_export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.opml");

        export_to_file(&[feed("File Export", "https://example.com/feed.xml")], &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(parse_opml(&content).unwrap()[0].title, "File Export");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_import_skips_existing() {
        let mut store = Store::open(MemoryStorage::new()).await;
        store.add_feed("https://a.example.com/rss", "A").await.unwrap();

        let feeds = vec![
            OpmlFeed {
                title: "A again".to_string(),
                xml_url: "https://a.example.com/rss".to_string(),
            },
            OpmlFeed {
                title: "B".to_string(),
                xml_url: "https://b.example.com/rss".to_string(),
            },
        ];
        let summary = import_into(&mut store, &feeds).await;

        assert_eq!(summary, ImportSummary { added: 1, skipped: 1 });
        assert_eq!(store.feed("https://b.example.com/rss").unwrap().title, "B");
        assert_eq!(store.feed("https://a.example.com/rss").unwrap().title, "A");
    }
}
