//! Reader-mode extraction of the main text of an article page.
//!
//! Extraction is heuristic: well-known article containers are tried first,
//! then the block holding the most paragraph text, then `<body>`. The result
//! must pass [`Extractor::validate`] before it replaces the feed-provided
//! summary; callers fall back to the summary otherwise.

use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use thiserror::Error;

use super::sanitizer::Sanitizer;

/// Minimum extracted length, in characters, for content to be trusted.
pub const MIN_EXTRACTED_LEN: usize = 200;

/// Selectors targeting main article content across common blog platforms.
/// Order matters: more specific selectors first, generic fallbacks last.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "[itemprop=articleBody]",
    ".entry-content",
    ".post-content",
    ".article-content",
    ".article-body",
    ".story-body",
    ".post-body",
    "main .content",
    "main",
    "[role=main]",
];

/// Page chrome removed before any region is scored.
const CHROME_SELECTOR: &str =
    "nav, header, footer, aside, form, style, noscript, button, svg, [role=navigation]";

/// Substrings that only appear when stylesheet or layout code leaked into
/// the extracted text.
const LAYOUT_SIGNATURES: &[&str] = &[
    "var(--",
    "z-index",
    "position:absolute",
    "position: absolute",
    "position:fixed",
    "position: fixed",
    "@media",
    "!important",
    "{display:",
    "{ display:",
    "font-family:",
];

static CONTENT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    CONTENT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});

static CHROME: LazyLock<Option<Selector>> = LazyLock::new(|| Selector::parse(CHROME_SELECTOR).ok());

static BLOCKS: LazyLock<Option<Selector>> = LazyLock::new(|| Selector::parse("div, section, td").ok());

static BODY: LazyLock<Option<Selector>> = LazyLock::new(|| Selector::parse("body").ok());

/// Extraction produced text that should not be shown in place of the feed
/// summary. Not a hard failure: callers fall back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionLowConfidence {
    #[error("extracted text too short ({len} chars, need more than {min})")]
    TooShort { len: usize, min: usize },
    #[error("extracted text contains layout markup ({0})")]
    LayoutLeakage(&'static str),
}

/// The main region of a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    /// Sanitized inner markup of the region, chrome removed.
    pub html: String,
}

#[derive(Debug, Clone)]
pub struct Extractor {
    sanitizer: Sanitizer,
    min_len: usize,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(Sanitizer::default(), MIN_EXTRACTED_LEN)
    }
}

impl Extractor {
    pub fn new(sanitizer: Sanitizer, min_len: usize) -> Self {
        Self { sanitizer, min_len }
    }

    /// Isolates the dominant text region of `page_html` as plain text.
    pub fn extract_main(&self, page_html: &str) -> String {
        self.extract(page_html).text
    }

    /// Isolates the dominant region of `page_html`, returning both its
    /// sanitized markup and its plain text.
    pub fn extract(&self, page_html: &str) -> Extracted {
        if page_html.trim().is_empty() {
            return Extracted::default();
        }

        let cleaned = self.sanitizer.clean(page_html);
        let mut doc = Html::parse_document(&cleaned);
        strip_chrome(&mut doc);

        let html = self
            .select_region(&doc)
            .or_else(|| {
                BODY.as_ref()
                    .and_then(|body| doc.select(body).next())
                    .map(|el| el.inner_html())
            })
            .unwrap_or_else(|| doc.root_element().inner_html());

        Extracted {
            text: self.sanitizer.to_plain_text(&html),
            html: html.trim().to_string(),
        }
    }

    /// Accepts extracted text only when it is long enough and free of
    /// stylesheet/layout leakage.
    pub fn validate(&self, extracted: &str) -> Result<(), ExtractionLowConfidence> {
        let len = extracted.trim().chars().count();
        if len <= self.min_len {
            return Err(ExtractionLowConfidence::TooShort {
                len,
                min: self.min_len,
            });
        }

        let lower = extracted.to_lowercase();
        if let Some(signature) = LAYOUT_SIGNATURES.iter().find(|s| lower.contains(*s)) {
            return Err(ExtractionLowConfidence::LayoutLeakage(*signature));
        }

        Ok(())
    }

    /// Returns `extracted` when it validates, `fallback` otherwise.
    pub fn readable_or_fallback<'a>(&self, extracted: &'a str, fallback: &'a str) -> &'a str {
        match self.validate(extracted) {
            Ok(()) => extracted,
            Err(reason) => {
                tracing::debug!(%reason, "Extraction rejected, using feed content");
                fallback
            }
        }
    }

    fn select_region(&self, doc: &Html) -> Option<String> {
        for selector in CONTENT.iter() {
            let best = doc
                .select(selector)
                .map(|el| (text_len(&el), el))
                .max_by_key(|(len, _)| *len);

            if let Some((len, el)) = best {
                if len >= self.min_len {
                    return Some(el.inner_html());
                }
            }
        }

        // No known container: the block with the most direct paragraph text
        let blocks = BLOCKS.as_ref()?;
        doc.select(blocks)
            .map(|el| (paragraph_score(&el), el))
            .filter(|(score, _)| *score > 0)
            .max_by_key(|(score, _)| *score)
            .map(|(_, el)| el.inner_html())
    }
}

fn strip_chrome(doc: &mut Html) {
    let Some(chrome) = CHROME.as_ref() else {
        return;
    };
    let ids: Vec<_> = doc.select(chrome).map(|el| el.id()).collect();
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn text_len(el: &ElementRef<'_>) -> usize {
    el.text().map(|t| t.trim().chars().count()).sum()
}

fn paragraph_score(el: &ElementRef<'_>) -> usize {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == "p")
        .map(|p| text_len(&p))
        .sum()
}
