use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Hex length kept from the SHA-256 digest (128 bits).
const ID_HEX_LEN: usize = 32;

/// Derives a stable identifier from `parts` joined with `|`.
///
/// The same inputs always produce the same id, so re-ingesting an item that
/// was already stored maps onto the existing record.
pub fn hash_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..ID_HEX_LEN].to_string()
}

/// Fresh identifier for a newly subscribed feed.
pub fn new_feed_id(url: &str, created: DateTime<Utc>) -> String {
    let nanos = created
        .timestamp_nanos_opt()
        .unwrap_or_else(|| created.timestamp_micros())
        .to_string();
    hash_id(&["feed", url, &nanos])
}
