//! Matsui Securities
//!
//! Paginated HTML table, 100 rows per page. A result line such as
//! `検索結果 284件中 1 - 100件` tells whether more pages follow.

use super::table::{cell, combine, parse_table};
use super::{EarningsSource, RawRow};
use crate::error::SourceError;
use crate::fetch::PageFetcher;
use crate::html::{element_text, selector};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use tracing::{debug, warn};

const BASE_URL: &str = "https://finance.matsui.co.jp/find-by-schedule/index";
const PER_PAGE: usize = 100;
const MAX_PAGES: usize = 50;

static RESULT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)件中.*?(\d+)件").expect("result pattern is valid"));
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)\(").expect("name pattern is valid"));
static CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\w+)\)").expect("code pattern is valid"));

pub struct MatsuiSource;

/// One parsed result page
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MatsuiPage {
    pub rows: Vec<RawRow>,
    /// More pages follow this one
    pub has_more: bool,
}

pub fn page_url(date: NaiveDate, page: usize) -> String {
    format!(
        "{}?date={}/{}/{}&page={}&per_page={}",
        BASE_URL,
        date.year(),
        date.month(),
        date.day(),
        page,
        PER_PAGE
    )
}

/// Parse one result page
///
/// `発表日` falls back to `date` when unreadable. Rows whose name cell has no
/// `(code)` are dropped.
pub fn parse_page(html: &str, date: NaiveDate) -> MatsuiPage {
    let document = Html::parse_document(html);

    let result_text = document
        .select(&selector("p.m-table-utils-result"))
        .next()
        .map(element_text);
    let counts = result_text.as_deref().and_then(|t| {
        let c = RESULT_RE.captures(t)?;
        let total: usize = c.get(1)?.as_str().parse().ok()?;
        let shown: usize = c.get(2)?.as_str().parse().ok()?;
        Some((total, shown))
    });
    if matches!(counts, Some((0, _))) {
        return MatsuiPage::default();
    }

    let Some(table) = parse_table(&document, "table.m-table") else {
        return MatsuiPage::default();
    };

    let date_col = table.exact_column("発表日");
    let time_col = table.exact_column("発表時刻");
    let name_col = table.column("銘柄名");

    let rows = table
        .rows
        .iter()
        .filter_map(|row| {
            let name_cell = cell(row, name_col)?;
            let code = CODE_RE.captures(name_cell)?.get(1)?.as_str().to_string();
            let name = NAME_RE
                .captures(name_cell)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string());

            let row_date = match cell(row, date_col) {
                Some(text) => NaiveDate::parse_from_str(text.trim(), "%Y/%m/%d").ok(),
                None => Some(date),
            };
            Some(RawRow {
                code,
                name,
                datetime: combine(row_date, cell(row, time_col)),
            })
        })
        .collect();

    MatsuiPage {
        rows,
        has_more: counts.is_some_and(|(total, shown)| shown < total),
    }
}

#[async_trait]
impl EarningsSource for MatsuiSource {
    fn name(&self) -> &'static str {
        "matsui"
    }

    async fn fetch_raw(
        &self,
        fetcher: &dyn PageFetcher,
        date: NaiveDate,
    ) -> Result<Vec<RawRow>, SourceError> {
        let mut rows = Vec::new();
        for page in 1..=MAX_PAGES {
            let html = fetcher.fetch_page(&page_url(date, page)).await?;
            let parsed = parse_page(&html, date);
            debug!(page, rows = parsed.rows.len(), "Matsui page parsed");

            let stop = parsed.rows.is_empty() || !parsed.has_more;
            rows.extend(parsed.rows);
            if stop {
                return Ok(rows);
            }
        }
        warn!(pages = MAX_PAGES, "Matsui pagination did not terminate; keeping rows so far");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 13).unwrap()
    }

    fn page(result: &str, body: &str) -> String {
        format!(
            r#"<html><body>
               <p class="m-table-utils-result">{result}</p>
               <table class="m-table">
                 <thead><tr><th>発表日</th><th>発表時刻</th><th>銘柄名<br>(銘柄コード)</th><th>決算期</th></tr></thead>
                 <tbody>{body}</tbody>
               </table>
               </body></html>"#
        )
    }

    #[test]
    fn test_page_url_is_unpadded() {
        let url = page_url(NaiveDate::from_ymd_opt(2026, 2, 3).unwrap(), 2);
        assert_eq!(
            url,
            "https://finance.matsui.co.jp/find-by-schedule/index?date=2026/2/3&page=2&per_page=100"
        );
    }

    #[test]
    fn test_parse_rows() {
        let html = page(
            "検索結果 3件中 1 - 3件",
            "<tr><td>2026/02/13</td><td>13:55</td><td>トヨタ自動車(7203)</td><td>3月</td></tr>
             <tr><td>2026/02/13</td><td>-</td><td>新興(130A)</td><td>3月</td></tr>
             <tr><td>2026/02/13</td><td>15:00</td><td>コードなし</td><td>3月</td></tr>",
        );
        let parsed = parse_page(&html, date());

        assert!(!parsed.has_more);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].code, "7203");
        assert_eq!(parsed.rows[0].name.as_deref(), Some("トヨタ自動車"));
        assert_eq!(parsed.rows[0].datetime, date().and_hms_opt(13, 55, 0));
        assert_eq!(parsed.rows[1].code, "130A");
        assert!(parsed.rows[1].datetime.is_none());
    }

    #[test]
    fn test_has_more_pages() {
        let html = page(
            "検索結果 150件中 1 - 100件",
            "<tr><td>2026/02/13</td><td>15:00</td><td>ソニーG(6758)</td><td>3月</td></tr>",
        );
        assert!(parse_page(&html, date()).has_more);

        let html = page(
            "検索結果 150件中 101 - 150件",
            "<tr><td>2026/02/13</td><td>15:00</td><td>ソニーG(6758)</td><td>3月</td></tr>",
        );
        assert!(!parse_page(&html, date()).has_more);
    }

    #[test]
    fn test_zero_results() {
        let html = page("検索結果 0件中 0 - 0件", "");
        assert_eq!(parse_page(&html, date()), MatsuiPage::default());
    }

    #[test]
    fn test_missing_table() {
        assert_eq!(parse_page("<html></html>", date()), MatsuiPage::default());
    }
}
