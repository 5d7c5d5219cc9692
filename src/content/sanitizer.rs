//! Advertising/tracking removal and HTML-to-text conversion.
//!
//! All ad matching is driven by a single rule table ([`AdRules`]): a list of
//! ad/tracker domains checked against iframe sources and a list of
//! class/id fragments checked against every element. One [`Sanitizer`]
//! routine consumes the table, so rule sets can be tested in isolation.
//!
//! Both [`Sanitizer::clean`] and [`Sanitizer::to_plain_text`] are total:
//! they accept any string, never panic on malformed markup, and return an
//! empty string for empty input.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());

static SCRIPT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)</?script\b[^>]*>").unwrap());

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([a-zA-Z][a-zA-Z0-9]*)([^<>]*)>").unwrap());

static TARGET_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|\s)(class|id|src)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap()
});

static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());

static NOSCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<noscript\b[^>]*>.*?</noscript\s*>").unwrap());

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<(br|hr)\s*/?>").unwrap());

static BLOCK_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)</(p|div|h[1-6]|li|ul|ol|tr|table|blockquote|section|article|header|footer|pre|figure|figcaption)\s*>",
    )
    .unwrap()
});

static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<>]*>").unwrap());

static INLINE_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r\x0B\x0C\u{a0}]+").unwrap());

static DEFAULT_SANITIZER: LazyLock<Sanitizer> =
    LazyLock::new(|| Sanitizer::new(&AdRules::default()));

/// Elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Upper bound on cleaning passes. Removing an element can splice text into
/// a new tag; re-running until the output stops changing keeps `clean`
/// idempotent.
const MAX_CLEAN_PASSES: usize = 4;

const DEFAULT_AD_DOMAINS: &[&str] = &[
    "doubleclick.net",
    "googlesyndication.com",
    "googleadservices.com",
    "google-analytics.com",
    "googletagmanager.com",
    "adservice.google.com",
    "amazon-adsystem.com",
    "adnxs.com",
    "taboola.com",
    "outbrain.com",
    "criteo.com",
    "pubmatic.com",
    "rubiconproject.com",
    "scorecardresearch.com",
    "moatads.com",
];

const DEFAULT_AD_PATTERNS: &[&str] = &[
    "advert",
    "adsbygoogle",
    "ad-container",
    "ad-slot",
    "ad-banner",
    "ad-wrapper",
    "ad-unit",
    "ad_unit",
    "google-ads",
    "dfp-",
    "sponsored",
    "promoted-content",
    "taboola",
    "outbrain",
    "tracking-pixel",
];

/// Data-driven ad/tracker rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdRules {
    /// Domains whose iframes are removed (substring match on `src`).
    pub domains: Vec<String>,
    /// Fragments matched case-insensitively against `class` and `id`.
    pub patterns: Vec<String>,
}

impl Default for AdRules {
    fn default() -> Self {
        Self {
            domains: DEFAULT_AD_DOMAINS.iter().map(|d| d.to_string()).collect(),
            patterns: DEFAULT_AD_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Compiled form of an [`AdRules`] table.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    domains: Vec<String>,
    patterns: Vec<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(&AdRules::default())
    }
}

impl Sanitizer {
    pub fn new(rules: &AdRules) -> Self {
        let normalize = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            domains: normalize(&rules.domains),
            patterns: normalize(&rules.patterns),
        }
    }

    /// Strips scripts, ad-domain iframes and ad-pattern elements.
    ///
    /// Markup that is not matched is returned byte-for-byte.
    pub fn clean(&self, html: &str) -> String {
        let mut current = html.to_string();
        for _ in 0..MAX_CLEAN_PASSES {
            let next = self.clean_once(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    /// Converts markup into readable plain text.
    ///
    /// Runs [`clean`](Self::clean), drops style/noscript/comment blocks, turns
    /// line-break and block-closing tags into newlines, strips every other
    /// tag, decodes HTML entities and normalizes whitespace (single spaces
    /// within a line, at most one blank line between paragraphs).
    pub fn to_plain_text(&self, html: &str) -> String {
        if html.trim().is_empty() {
            return String::new();
        }

        let cleaned = self.clean(html);
        let text = COMMENT.replace_all(&cleaned, "");
        let text = STYLE_BLOCK.replace_all(&text, "");
        let text = NOSCRIPT_BLOCK.replace_all(&text, "");
        let text = LINE_BREAK.replace_all(&text, "\n");
        let text = BLOCK_END.replace_all(&text, "\n");
        let text = ANY_TAG.replace_all(&text, "");
        let decoded = html_escape::decode_html_entities(&text);

        normalize_whitespace(&decoded)
    }

    fn clean_once(&self, html: &str) -> String {
        if html.is_empty() {
            return String::new();
        }
        let without_scripts = SCRIPT_BLOCK.replace_all(html, "");
        let without_scripts = SCRIPT_TAG.replace_all(&without_scripts, "");
        self.strip_ad_elements(&without_scripts)
    }

    fn strip_ad_elements(&self, html: &str) -> String {
        // ASCII lowercasing keeps byte offsets identical to `html`
        let lower = html.to_ascii_lowercase();
        let mut out = String::with_capacity(html.len());
        let mut pos = 0;

        while let Some(caps) = OPEN_TAG.captures_at(html, pos) {
            let (Some(whole), Some(name), Some(attrs)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                break;
            };
            let tag = name.as_str().to_ascii_lowercase();

            if self.is_ad_element(&tag, attrs.as_str()) {
                out.push_str(&html[pos..whole.start()]);
                let self_closing = attrs.as_str().trim_end().ends_with('/');
                pos = element_end(&lower, &tag, whole.end(), self_closing);
            } else {
                out.push_str(&html[pos..whole.end()]);
                pos = whole.end();
            }
        }

        out.push_str(&html[pos..]);
        out
    }

    fn is_ad_element(&self, tag: &str, attrs: &str) -> bool {
        TARGET_ATTR.captures_iter(attrs).any(|caps| {
            let name = caps
                .get(1)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();

            match name.as_str() {
                "src" => tag == "iframe" && self.domains.iter().any(|d| value.contains(d)),
                "class" | "id" => self.patterns.iter().any(|p| value.contains(p)),
                _ => false,
            }
        })
    }
}

/// Returns the byte offset just past the element whose opening tag ends at
/// `from`. Nested elements with the same tag name are balanced. An element
/// without a closing tag loses only its opening tag.
fn element_end(lower: &str, tag: &str, from: usize, self_closing: bool) -> usize {
    if self_closing || VOID_ELEMENTS.contains(&tag) {
        return from;
    }

    let open_pat = format!("<{tag}");
    let close_pat = format!("</{tag}");
    let mut depth = 1usize;
    let mut cursor = from;

    loop {
        let next_open = find_tag(lower, &open_pat, cursor);
        let Some(next_close) = find_tag(lower, &close_pat, cursor) else {
            return from;
        };

        match next_open {
            Some(open) if open < next_close => {
                depth += 1;
                cursor = open + open_pat.len();
            }
            _ => {
                let end = lower[next_close..]
                    .find('>')
                    .map(|offset| next_close + offset + 1)
                    .unwrap_or(lower.len());
                depth -= 1;
                if depth == 0 {
                    return end;
                }
                cursor = end;
            }
        }
    }
}

/// Finds `pattern` (e.g. `<div`) at or after `from`, requiring that the tag
/// name is not merely a prefix of a longer one (`<divider`).
fn find_tag(lower: &str, pattern: &str, from: usize) -> Option<usize> {
    let mut cursor = from;
    while cursor <= lower.len() {
        let idx = cursor + lower.get(cursor..)?.find(pattern)?;
        let after = idx + pattern.len();
        let boundary = lower[after..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        if boundary {
            return Some(idx);
        }
        cursor = after;
    }
    None
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;

    for line in text.lines() {
        let collapsed = INLINE_SPACE.replace_all(line, " ");
        let trimmed = collapsed.trim();
        if trimmed.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        out.push_str(trimmed);
        pending_blank = false;
    }

    out
}

/// [`Sanitizer::clean`] with the built-in rule table.
pub fn clean(html: &str) -> String {
    DEFAULT_SANITIZER.clean(html)
}

/// [`Sanitizer::to_plain_text`] with the built-in rule table.
pub fn to_plain_text(html: &str) -> String {
    DEFAULT_SANITIZER.to_plain_text(html)
}
