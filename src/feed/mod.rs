//! Feed retrieval, normalization and subscription management.
//!
//! - [`resolver`] - direct fetch with an ordered relay fallback chain,
//!   yielding a [`FeedDocument`] tagged by shape
//! - [`normalizer`] - RSS/Atom/JSON Feed (via `feed-rs`) and converter JSON
//!   into [`Article`](crate::storage::Article) records
//! - [`refresh`] - subscribe and sequential bulk refresh into the Store
//! - [`opml`] - subscription list import/export
//!
//! # Example
//!
//! ```ignore
//! let ingestor = Ingestor::new(Resolver::new(client, default_relays()), Normalizer::default());
//! ingestor.subscribe(&mut store, "https://example.com/feed.xml", None).await?;
//! let summary = ingestor.refresh_all(&mut store).await;
//! println!("{}", summary.message());
//! ```

pub mod normalizer;
pub mod opml;
pub mod refresh;
pub mod resolver;

pub use normalizer::{NormalizedFeed, Normalizer, UNTITLED};
pub use opml::{export_opml, export_to_file, import_into, parse_opml, ImportSummary, OpmlError, OpmlFeed};
pub use refresh::{Ingestor, RefreshError, RefreshSummary, SubscribeError, Subscription};
pub use resolver::{
    default_relays, ConvertedFeed, ConvertedFeedInfo, FeedDocument, FetchError, RelayKind,
    RelayStrategy, Resolver,
};
