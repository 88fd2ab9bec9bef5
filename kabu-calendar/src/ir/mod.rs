//! Company IR (investor relations) pages
//!
//! A company's own IR page is treated as ground truth for its announcement
//! datetime. This module finds the page, parses it and caches what it learned.
//!
//! # Components
//! - **cache** - JSON file of known IR pages per code, with TTL
//! - **parser** - rule-based Japanese date/time extraction
//! - **discovery** - finds the IR page for a code
//! - **provider** - ties the three together behind [`IrProvider`]

pub mod cache;
pub mod discovery;
pub mod parser;
pub mod provider;

use crate::error::SourceError;
use crate::types::{StockCode, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use cache::{CacheEntry, IrCache};
pub use discovery::{CuratedDiscovery, IrDiscovery};
pub use parser::{parse_earnings_from_html, EarningsInfo, ParseConfidence};
pub use provider::CachedIrProvider;

/// Kind of IR page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IrPageType {
    /// Dedicated earnings calendar page
    Calendar,
    /// IR news / releases
    News,
    /// IR library / documents
    Library,
    /// Main IR landing page
    Landing,
    #[serde(other)]
    Unknown,
}

impl IrPageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IrPageType::Calendar => "calendar",
            IrPageType::News => "news",
            IrPageType::Library => "library",
            IrPageType::Landing => "landing",
            IrPageType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for IrPageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discovered IR page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrPageInfo {
    pub url: String,
    pub page_type: IrPageType,
    pub code: StockCode,
    /// How the page was found ("manual", "pattern", ...)
    pub discovered_via: String,
}

/// A datetime taken from a company IR page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrObservation {
    pub datetime: Timestamp,
    pub parse_confidence: ParseConfidence,
    /// "cache" or the parser that produced it ("rule")
    pub method: String,
}

/// Source of IR datetimes
///
/// Implementations own their caching. `eager` asks to bypass any cached
/// answer and look again.
#[async_trait]
pub trait IrProvider: Send + Sync {
    async fn lookup(
        &self,
        code: &StockCode,
        eager: bool,
    ) -> Result<Option<IrObservation>, SourceError>;
}

/// Classify an IR page from its URL, then from its content
pub fn detect_page_type(url: &str, html: Option<&str>) -> IrPageType {
    let url_lower = url.to_lowercase();

    if ["/calendar", "/schedule", "/event"].iter().any(|p| url_lower.contains(p)) {
        return IrPageType::Calendar;
    }
    if ["/news", "/release", "/whatsnew", "/topics"].iter().any(|p| url_lower.contains(p)) {
        return IrPageType::News;
    }
    if ["/library", "/document", "/report"].iter().any(|p| url_lower.contains(p)) {
        return IrPageType::Library;
    }
    if ["/ir/", "/ir", "/investor/", "/investors/"].iter().any(|p| url_lower.ends_with(p)) {
        return IrPageType::Landing;
    }

    if let Some(html) = html {
        let html_lower = html.to_lowercase();
        if ["決算カレンダー", "決算発表予定", "irカレンダー", "earnings calendar"]
            .iter()
            .any(|kw| html_lower.contains(kw))
        {
            return IrPageType::Calendar;
        }
        if ["ir情報", "投資家情報", "investor relations"]
            .iter()
            .any(|kw| html_lower.contains(kw))
        {
            return IrPageType::Landing;
        }
    }

    IrPageType::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_page_type_from_url() {
        assert_eq!(detect_page_type("https://x.co.jp/ir/calendar/", None), IrPageType::Calendar);
        assert_eq!(detect_page_type("https://x.co.jp/ir/news/", None), IrPageType::News);
        assert_eq!(detect_page_type("https://x.co.jp/ir/library/", None), IrPageType::Library);
        assert_eq!(detect_page_type("https://x.co.jp/ir/", None), IrPageType::Landing);
        assert_eq!(detect_page_type("https://x.co.jp/about", None), IrPageType::Unknown);
    }

    #[test]
    fn test_detect_page_type_from_content() {
        let html = "<h1>IRカレンダー</h1>";
        assert_eq!(detect_page_type("https://x.co.jp/p", Some(html)), IrPageType::Calendar);
        let html = "<h1>投資家情報</h1>";
        assert_eq!(detect_page_type("https://x.co.jp/p", Some(html)), IrPageType::Landing);
    }

    #[test]
    fn test_unknown_page_type_deserializes() {
        let t: IrPageType = serde_json::from_str("\"mystery\"").unwrap();
        assert_eq!(t, IrPageType::Unknown);
    }
}
