//! Feed download and format-specific traversal.
//!
//! Every format is exposed as an iterator of [`RawRecord`]s over an
//! in-memory body; [`FeedParser::parse_full`] drives it with a per-item
//! callback and [`FeedParser::preview`] samples a bounded prefix.

use crate::config::ImporterSettings;
use crate::error::{Cancelled, ItemError, ParseError, TraversalError};
use crate::format::detect_format;
use feed_types::feed::FeedConfig;
use feed_types::item::RawRecord;
use feed_types::FeedFormat;
use itertools::Itertools;
use reqwest::Client;
use serde::Serialize;

pub mod csv;
pub mod download;
pub mod json;
pub mod xml;

#[derive(Debug, Clone)]
pub struct ParseHints {
    pub format: Option<FeedFormat>,
    pub xml_item_path: Option<String>,
    pub csv_delimiter: Option<u8>,
    pub csv_has_header: bool,
}

impl Default for ParseHints {
    fn default() -> Self {
        Self {
            format: None,
            xml_item_path: None,
            csv_delimiter: None,
            csv_has_header: true,
        }
    }
}

impl From<&FeedConfig> for ParseHints {
    fn from(feed: &FeedConfig) -> Self {
        Self {
            format: feed.format,
            xml_item_path: feed
                .xml_item_path
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            csv_delimiter: feed.csv_delimiter.and_then(ascii_delimiter),
            csv_has_header: feed.csv_has_header,
        }
    }
}

/// CSV delimiters are single bytes; anything outside ASCII is ignored with a warning.
pub fn ascii_delimiter(d: char) -> Option<u8> {
    match u8::try_from(d) {
        Ok(b) if b.is_ascii() => Some(b),
        _ => {
            log::warn!("Ignoring non-ASCII CSV delimiter {d:?}");
            None
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseResult {
    pub feed_type: FeedFormat,
    pub items: Vec<RawRecord>,
    pub fields: Vec<String>,
    pub total_count: usize,
    pub item_path: Option<String>,
    pub encoding: Option<String>,
    pub delimiter: Option<char>,
    pub parsed_bytes: usize,
}

pub struct FeedParser {
    url: String,
    hints: ParseHints,
    settings: ImporterSettings,
}

pub enum Records {
    Xml(xml::XmlRecords),
    Csv(csv::CsvRecords),
    Json(json::JsonRecords),
}

impl Iterator for Records {
    type Item = Result<RawRecord, ItemError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Xml(r) => r.next().map(Ok),
            Self::Csv(r) => r.next(),
            Self::Json(r) => r.next(),
        }
    }
}

impl FeedParser {
    pub fn new(url: impl Into<String>, hints: ParseHints, settings: &ImporterSettings) -> Self {
        Self {
            url: url.into(),
            hints,
            settings: settings.clone(),
        }
    }

    pub fn for_feed(feed: &FeedConfig, settings: &ImporterSettings) -> Self {
        Self::new(feed.url.clone(), ParseHints::from(feed), settings)
    }

    pub fn format_of(&self, data: &[u8]) -> FeedFormat {
        self.hints.format.unwrap_or_else(|| detect_format(data))
    }

    /// Item iterator over `data`. Fails only when the document as a whole is unusable.
    pub fn records(&self, data: &[u8]) -> Result<Records, ParseError> {
        Ok(match self.format_of(data) {
            FeedFormat::Xml => Records::Xml(xml::XmlRecords::new(xml::prepare(
                data,
                self.hints.xml_item_path.as_deref(),
            ))),
            FeedFormat::Csv => Records::Csv(csv::CsvRecords::new(
                data,
                self.hints.csv_delimiter,
                self.hints.csv_has_header,
            )?),
            FeedFormat::Json => Records::Json(json::JsonRecords::new(data)?),
        })
    }

    /// Calls `callback` for every item. Malformed items are skipped and counted in the
    /// returned total; a [`Cancelled`] from the callback stops the traversal and is
    /// returned as is.
    pub fn parse_full<F>(&self, data: &[u8], mut callback: F) -> Result<usize, TraversalError>
    where
        F: FnMut(RawRecord) -> Result<(), Cancelled>,
    {
        let mut malformed = 0;
        for record in self.records(data)? {
            match record {
                Ok(record) => callback(record)?,
                Err(err) => {
                    log::debug!("Skipping record of {}: {err}", self.url);
                    malformed += 1;
                }
            }
        }
        Ok(malformed)
    }

    pub async fn preview(&self, client: &Client, limit: usize) -> Result<ParseResult, ParseError> {
        let data = self
            .download_partial(client, self.settings.preview_bytes)
            .await;
        self.preview_bytes(&data, limit)
    }

    pub fn preview_bytes(&self, data: &[u8], limit: usize) -> Result<ParseResult, ParseError> {
        let feed_type = self.format_of(data);
        let mut result = ParseResult {
            feed_type,
            items: Vec::new(),
            fields: Vec::new(),
            total_count: 0,
            item_path: None,
            encoding: None,
            delimiter: None,
            parsed_bytes: data.len(),
        };
        match feed_type {
            FeedFormat::Xml => {
                let doc = xml::prepare(data, self.hints.xml_item_path.as_deref());
                result.item_path = Some(doc.item_path.clone());
                result.encoding = Some(doc.encoding.to_string());
                for record in xml::XmlRecords::new(doc).filter(|r| !r.is_empty()) {
                    result.total_count += 1;
                    if result.items.len() < limit {
                        result.items.push(record);
                    }
                    if result.total_count >= limit.saturating_mul(2) {
                        break;
                    }
                }
                result.fields = collect_fields(&result.items);
            }
            FeedFormat::Csv => {
                let records = csv::CsvRecords::new(
                    data,
                    self.hints.csv_delimiter,
                    self.hints.csv_has_header,
                )?;
                result.delimiter = Some(char::from(records.delimiter()));
                let headers = records.headers().to_vec();
                for record in records {
                    result.total_count += 1;
                    match record {
                        Ok(record) if result.items.len() < limit => result.items.push(record),
                        _ => {}
                    }
                }
                result.fields = if headers.is_empty() {
                    collect_fields(&result.items)
                } else {
                    headers
                };
            }
            FeedFormat::Json => {
                let records = json::JsonRecords::new(data)?;
                result.total_count = records.len();
                result.items = records.filter_map(Result::ok).take(limit).collect();
                result.fields = collect_fields(&result.items);
            }
        }
        Ok(result)
    }
}

fn collect_fields(items: &[RawRecord]) -> Vec<String> {
    items
        .iter()
        .flat_map(|r| r.keys())
        .unique()
        .map(str::to_string)
        .collect()
}
