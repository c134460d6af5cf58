//! Atom XML feed parsing (spec §6).
//!
//! Two incompatible entry shapes share the wire format: global feed entries
//! carry `id`/`category`/`link`/`updated`; company-scoped entries embed a
//! `<content>` block with `accession-number`/`cik`/`filing-type`/
//! `filing-href`/`filing-date` children. Both normalise to [`FeedEntry`].

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use thiserror::Error;

use super::cik::derive_cik;
use super::FeedEntry;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::DeError),
}

#[derive(Debug, Deserialize, Default)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize, Default)]
struct AtomEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    updated: String,
    #[serde(default)]
    category: Option<AtomCategory>,
    #[serde(default, rename = "link")]
    links: Vec<AtomLink>,
    #[serde(default)]
    content: Option<AtomContent>,
}

#[derive(Debug, Deserialize, Default)]
struct AtomCategory {
    #[serde(rename = "@term", default)]
    term: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AtomLink {
    #[serde(rename = "@href", default)]
    href: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AtomContent {
    #[serde(rename = "accession-number", default)]
    accession_number: Option<String>,
    #[serde(default)]
    cik: Option<String>,
    #[serde(rename = "filing-type", default)]
    filing_type: Option<String>,
    #[serde(rename = "filing-href", default)]
    filing_href: Option<String>,
    #[serde(rename = "filing-date", default)]
    filing_date: Option<String>,
}

fn accession_from_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"accession-number=([\d-]+)").unwrap())
}

fn parse_filed_at(updated: &str, filing_date: Option<&str>) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(updated) {
        return dt.with_timezone(&Utc);
    }
    if let Some(date) = filing_date {
        if let Ok(naive) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            return DateTime::<Utc>::from_naive_utc_and_offset(naive.and_hms_opt(0, 0, 0).unwrap(), Utc);
        }
    }
    DateTime::UNIX_EPOCH
}

/// Parse an Atom feed document into normalised entries. Entries missing an
/// accession number are skipped (spec §4.3: "each entry with a non-empty
/// accession number").
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, FeedError> {
    let feed: AtomFeed = quick_xml::de::from_str(xml)?;

    let entries = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            if let Some(content) = &entry.content {
                if let Some(accession) = content.accession_number.clone() {
                    let cik = content
                        .cik
                        .clone()
                        .or_else(|| derive_cik(&entry.id, content.filing_href.as_deref(), Some(&entry.title)))?;
                    return Some(FeedEntry {
                        accession,
                        cik,
                        form_type: content.filing_type.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
                        href: content.filing_href.clone().unwrap_or_default(),
                        filed_at: parse_filed_at(&entry.updated, content.filing_date.as_deref()),
                    });
                }
            }

            let accession = accession_from_id_re()
                .captures(&entry.id)
                .map(|c| c[1].to_string())?;
            let href = entry.links.first().and_then(|l| l.href.clone()).unwrap_or_default();
            let cik = derive_cik(&entry.id, Some(&href), Some(&entry.title))?;
            Some(FeedEntry {
                accession,
                cik,
                form_type: entry
                    .category
                    .and_then(|c| c.term)
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                href,
                filed_at: parse_filed_at(&entry.updated, None),
            })
        })
        .collect();

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GLOBAL_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>urn:accession-number=0001234567-25-000001</id>
    <title>10-K - Example Corp (0001234567)</title>
    <category term="10-K"/>
    <link href="https://archive.example/data/1234567/0001234567-25-000001-index.htm"/>
    <updated>2025-03-01T12:00:00Z</updated>
  </entry>
  <entry>
    <id>urn:accession-number=0007654321-25-000002</id>
    <title>Other Co</title>
    <link href="https://archive.example/data/7654321/0007654321-25-000002-index.htm"/>
    <updated>2025-03-02T09:30:00Z</updated>
  </entry>
</feed>"#;

    const COMPANY_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>urn:company-entry-1</id>
    <title>10-K filing</title>
    <updated>2025-03-01T00:00:00Z</updated>
    <content>
      <accession-number>0001234567-25-000001</accession-number>
      <cik>1234567</cik>
      <filing-type>10-K</filing-type>
      <filing-href>https://archive.example/data/1234567/0001234567-25-000001-index.htm</filing-href>
      <filing-date>2025-03-01</filing-date>
    </content>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_global_feed() {
        let entries = parse_feed(GLOBAL_FEED).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].accession, "0001234567-25-000001");
        assert_eq!(entries[0].cik, "1234567");
        assert_eq!(entries[0].form_type, "10-K");

        // second entry has no explicit category -> unknown form type
        assert_eq!(entries[1].form_type, "UNKNOWN");
        assert_eq!(entries[1].cik, "7654321");
    }

    #[test]
    fn test_parse_company_feed() {
        let entries = parse_feed(COMPANY_FEED).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].accession, "0001234567-25-000001");
        assert_eq!(entries[0].cik, "1234567");
        assert_eq!(entries[0].form_type, "10-K");
        assert_eq!(entries[0].filed_at.format("%Y-%m-%d").to_string(), "2025-03-01");
    }
}
