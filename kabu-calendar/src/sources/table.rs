//! HTML table extraction shared by the table-based sources

use crate::html::{compact_text, element_text, selector};
use crate::types::Timestamp;
use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{2})").expect("time pattern is valid"));

/// Header names and body cells of one table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlTable {
    /// Header texts with whitespace removed
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl HtmlTable {
    /// Index of the first header containing `needle`
    pub fn column(&self, needle: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.contains(needle))
    }

    /// Index of the header equal to `name`
    pub fn exact_column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// First table matching `css`, or `None` when the page has none
///
/// The header is the first row made only of `th` cells. Every later row
/// with at least one `td` is a body row.
pub fn parse_table(document: &Html, css: &str) -> Option<HtmlTable> {
    let table = document.select(&selector(css)).next()?;
    let row_selector = selector("tr");
    let cell_selector = selector("td, th");
    let td_selector = selector("td");

    let mut parsed = HtmlTable::default();
    for row in table.select(&row_selector) {
        let has_td = row.select(&td_selector).next().is_some();
        if !has_td {
            if parsed.headers.is_empty() && parsed.rows.is_empty() {
                parsed.headers = row.select(&cell_selector).map(compact_text).collect();
            }
            continue;
        }
        parsed.rows.push(row.select(&cell_selector).map(element_text).collect());
    }
    Some(parsed)
}

/// Cell text at `index`, if the row is long enough
pub fn cell(row: &[String], index: Option<usize>) -> Option<&str> {
    index.and_then(|i| row.get(i)).map(String::as_str)
}

/// `HH:MM` anywhere in a cell; `-`, blanks and garbage are absent
pub fn parse_time_cell(text: &str) -> Option<NaiveTime> {
    let caps = TIME_RE.captures(text)?;
    let hour = caps.get(1)?.as_str().parse().ok()?;
    let minute = caps.get(2)?.as_str().parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Date plus time cell; absent when either part is missing
pub fn combine(date: Option<NaiveDate>, time: Option<&str>) -> Option<Timestamp> {
    Some(date?.and_time(parse_time_cell(time?)?))
}
