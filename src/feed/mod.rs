//! Regulatory archive feed protocol (spec §6, component 4.3).
//!
//! A global feed and zero or more per-issuer feeds are both Atom XML with
//! slightly different entry shapes; [`atom::parse_feed`] normalises both
//! into a flat [`FeedEntry`] list.

pub mod atom;
pub mod cik;

pub use atom::{parse_feed, FeedError};

use chrono::{DateTime, Utc};

/// One normalised feed entry, regardless of which Atom shape it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub accession: String,
    pub cik: String,
    pub form_type: String,
    pub href: String,
    pub filed_at: DateTime<Utc>,
}

/// Derive the RAW artifact URL from an INDEX href by suffix substitution
/// (spec §4.4/§6). Returns `None` if neither known suffix matches.
pub fn derive_raw_url(index_href: &str) -> Option<String> {
    if let Some(stripped) = index_href.strip_suffix("-index.html") {
        return Some(format!("{stripped}.txt"));
    }
    if let Some(stripped) = index_href.strip_suffix("-index.htm") {
        return Some(format!("{stripped}.txt"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_raw_url_htm() {
        assert_eq!(
            derive_raw_url("https://archive.example/1234567/0001234567-25-000001-index.htm"),
            Some("https://archive.example/1234567/0001234567-25-000001.txt".to_string())
        );
    }

    #[test]
    fn test_derive_raw_url_html() {
        assert_eq!(
            derive_raw_url("https://archive.example/x-index.html"),
            Some("https://archive.example/x.txt".to_string())
        );
    }

    #[test]
    fn test_derive_raw_url_no_match() {
        assert_eq!(derive_raw_url("https://archive.example/plain.htm"), None);
    }
}
