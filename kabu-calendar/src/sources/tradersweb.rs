//! Traders Web
//!
//! Single HTML table. `発表日` is `MM/DD` without a year; the name column
//! reads `トヨタ自動車(7203/東P)`.

use super::table::{cell, combine, parse_table};
use super::{EarningsSource, RawRow};
use crate::error::SourceError;
use crate::fetch::PageFetcher;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use tracing::warn;

const BASE_URL: &str = "https://www.traders.co.jp/market_jp/earnings_calendar";

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^(]+)").expect("name pattern is valid"));
static CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\w+)/").expect("code pattern is valid"));
static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").expect("word pattern is valid"));

pub struct TraderswebSource;

pub fn page_url(date: NaiveDate) -> String {
    format!("{}/all/all/1?term={}", BASE_URL, date.format("%Y/%m/%d"))
}

/// Rows of the earnings table; an absent table gives no rows
pub fn parse_page(html: &str, date: NaiveDate) -> Vec<RawRow> {
    let document = Html::parse_document(html);
    let Some(table) = parse_table(&document, "table.data_table") else {
        warn!("Tradersweb table not found");
        return Vec::new();
    };

    let date_col = table.exact_column("発表日");
    let time_col = table.exact_column("時刻");
    let name_col = table.column("銘柄名");

    table
        .rows
        .iter()
        .filter_map(|row| {
            let name_cell = cell(row, name_col)?;
            let code = CODE_RE.captures(name_cell)?.get(1)?.as_str();
            if !WORD_RE.is_match(code) {
                return None;
            }
            let name = NAME_RE
                .captures(name_cell)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string());

            let row_date = match cell(row, date_col) {
                Some(text) => NaiveDate::parse_from_str(
                    &format!("{}/{}", date.year(), text.trim()),
                    "%Y/%m/%d",
                )
                .ok(),
                None => Some(date),
            };
            Some(RawRow {
                code: code.to_string(),
                name,
                datetime: combine(row_date, cell(row, time_col)),
            })
        })
        .collect()
}

#[async_trait]
impl EarningsSource for TraderswebSource {
    fn name(&self) -> &'static str {
        "tradersweb"
    }

    async fn fetch_raw(
        &self,
        fetcher: &dyn PageFetcher,
        date: NaiveDate,
    ) -> Result<Vec<RawRow>, SourceError> {
        let html = fetcher.fetch_page(&page_url(date)).await?;
        Ok(parse_page(&html, date))
    }
}
