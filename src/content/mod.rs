//! Article content processing.
//!
//! - [`sanitizer`] - ad/tracker stripping and HTML-to-text conversion
//! - [`direction`] - right-to-left detection for display hints
//! - [`extractor`] - reader-mode extraction of a page's main text
//! - [`offline`] - fetching article pages for offline reading

pub mod direction;
pub mod extractor;
pub mod offline;
pub mod sanitizer;

pub use direction::{detect, Direction, TextAlignment, TextDirection};
pub use extractor::{Extracted, ExtractionLowConfidence, Extractor, MIN_EXTRACTED_LEN};
pub use offline::{ContentError, OfflineContent, OfflineFetcher};
pub use sanitizer::{clean, to_plain_text, AdRules, Sanitizer};
