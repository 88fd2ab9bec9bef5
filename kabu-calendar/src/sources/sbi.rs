//! SBI Securities
//!
//! Two requests, no pagination:
//! 1. The calendar page, only to read the 40-hex `hash` embedded in its scripts
//! 2. The JSONP announcement API with that hash, which lists every company
//!    for the date

use super::{EarningsSource, RawRow};
use crate::error::SourceError;
use crate::fetch::PageFetcher;
use crate::sources::table::combine;
use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use tracing::debug;

const PAGE_URL: &str = "https://www.sbisec.co.jp/ETGate/";
const API_ENDPOINT: &str =
    "https://vc.iris.sbisec.co.jp/calendar/settlement/stock/announcement_info_date.do";

static HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"hash=([a-f0-9]{40})").expect("hash pattern is valid"));
static BODY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)"body"\s*:\s*\[(.*?)\]\s*\}"#).expect("body pattern is valid")
});
static BARE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\s)(\w+)\s*:").expect("key pattern is valid"));

pub struct SbiSource;

/// Calendar page URL for `date`
pub fn page_url(date: NaiveDate) -> String {
    let ym = date.format("%Y%m");
    let ymd = date.format("%Y%m%d");
    format!(
        "{PAGE_URL}?_ControlID=WPLETmgR001Control&_PageID=WPLETmgR001Mdtl20\
         &_DataStoreID=DSWPLETmgR001Control&_ActionID=DefaultAID\
         &burl=iris_economicCalendar&cat1=market&cat2=economicCalender\
         &dir=tl1-cal%7Ctl2-schedule%7Ctl3-stock%7Ctl4-calsel%7Ctl9-{ym}%7Ctl10-{ymd}\
         &file=index.html&getFlg=on"
    )
}

/// Announcement API URL for `date`
pub fn api_url(hash: &str, date: NaiveDate) -> Result<String, SourceError> {
    let selected = date.format("%Y%m%d").to_string();
    Url::parse_with_params(
        API_ENDPOINT,
        &[
            ("hash", hash),
            ("type", "delay"),
            ("selectedDate", selected.as_str()),
            ("callback", "cb"),
        ],
    )
    .map(String::from)
    .map_err(|e| SourceError::Parse(format!("Invalid SBI API URL: {}", e)))
}

pub fn extract_hash(html: &str) -> Option<&str> {
    HASH_RE.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Rows of a JSONP response
///
/// The `body` array uses bare object keys, so they are quoted before the
/// array is read as JSON. Entries without `productCode` are skipped; a
/// `time` without `HH:MM` (e.g. `未定`) gives an absent datetime.
pub fn parse_jsonp(text: &str, date: NaiveDate) -> Result<Vec<RawRow>, SourceError> {
    let body = BODY_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .ok_or_else(|| SourceError::Parse("No body array in SBI response".to_string()))?;

    let quoted = BARE_KEY_RE.replace_all(body.as_str(), "$1\"$2\":");
    let items: Vec<serde_json::Value> = serde_json::from_str(&format!("[{}]", quoted))
        .map_err(|e| SourceError::Parse(format!("SBI body is not valid JSON: {}", e)))?;

    let text_field = |item: &serde_json::Value, key: &str| -> Option<String> {
        match item.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };

    Ok(items
        .iter()
        .filter_map(|item| {
            let code = text_field(item, "productCode").filter(|c| !c.is_empty())?;
            let time = text_field(item, "time");
            Some(RawRow {
                code,
                name: text_field(item, "productName"),
                datetime: combine(Some(date), time.as_deref()),
            })
        })
        .collect())
}

#[async_trait]
impl EarningsSource for SbiSource {
    fn name(&self) -> &'static str {
        "sbi"
    }

    async fn fetch_raw(
        &self,
        fetcher: &dyn PageFetcher,
        date: NaiveDate,
    ) -> Result<Vec<RawRow>, SourceError> {
        let page = fetcher.fetch_page(&page_url(date)).await?;
        let hash = extract_hash(&page)
            .ok_or_else(|| SourceError::Parse("No hash on SBI calendar page".to_string()))?;
        debug!(hash = &hash[..8], "Calling SBI announcement API");

        let jsonp = fetcher.fetch_page(&api_url(hash, date)?).await?;
        parse_jsonp(&jsonp, date)
    }
}
