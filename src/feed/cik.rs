//! CIK derivation (spec §6): from the entry id, a `/data/<digits>/` URL
//! segment, or a `(<digits>)` parenthesised suffix in the title, in that
//! order of preference.

use regex::Regex;
use std::sync::OnceLock;

fn id_accession_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"accession-number=(\d+)-\d+-\d+").unwrap())
}

fn data_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/data/(\d+)/").unwrap())
}

fn title_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d+)\)\s*$").unwrap())
}

/// Strip leading zeros but keep at least one digit.
fn normalize(digits: &str) -> String {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// By convention the first dash-delimited segment of an accession number is
/// the filer's CIK, zero-padded to 10 digits.
pub fn cik_from_id(id: &str) -> Option<String> {
    id_accession_re()
        .captures(id)
        .map(|c| normalize(&c[1]))
}

pub fn cik_from_href(href: &str) -> Option<String> {
    data_segment_re().captures(href).map(|c| normalize(&c[1]))
}

pub fn cik_from_title(title: &str) -> Option<String> {
    title_suffix_re().captures(title).map(|c| normalize(&c[1]))
}

/// Try, in order: the entry id, a `/data/<digits>/` URL segment, then a
/// `(<digits>)` title suffix.
pub fn derive_cik(id: &str, href: Option<&str>, title: Option<&str>) -> Option<String> {
    cik_from_id(id)
        .or_else(|| href.and_then(cik_from_href))
        .or_else(|| title.and_then(cik_from_title))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cik_from_id() {
        assert_eq!(
            cik_from_id("urn:accession-number=0001234567-25-000001"),
            Some("1234567".to_string())
        );
    }

    #[test]
    fn test_cik_from_href_data_segment() {
        assert_eq!(
            cik_from_href("https://archive.example/data/1234567/0001234567-25-000001-index.htm"),
            Some("1234567".to_string())
        );
    }

    #[test]
    fn test_cik_from_title_suffix() {
        assert_eq!(
            cik_from_title("Example Corp 10-K (0001234567)"),
            Some("1234567".to_string())
        );
    }

    #[test]
    fn test_derive_cik_prefers_id() {
        let id = "urn:accession-number=0009999999-25-000001";
        assert_eq!(
            derive_cik(id, Some("/data/1234567/x"), Some("(7654321)")),
            Some("9999999".to_string())
        );
    }

    #[test]
    fn test_derive_cik_falls_back_to_title() {
        assert_eq!(
            derive_cik("no-accession-here", None, Some("Example Corp (42)")),
            Some("42".to_string())
        );
    }

    #[test]
    fn test_derive_cik_none_when_nothing_matches() {
        assert_eq!(derive_cik("nothing", None, None), None);
    }
}
