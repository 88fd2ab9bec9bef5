//! Rule-based extraction of earnings datetimes from IR pages
//!
//! The page is reduced to short text contexts likely to mention the
//! announcement (table rows and small blocks containing an earnings keyword,
//! plus the element around the stock code). Each context is searched for a
//! Japanese or ISO-style date and, if present, a time.
//!
//! # Recognised formats
//! - Dates: `2026年2月13日`, `2026/2/13`, `2026-02-13`, `令和8年2月13日`
//! - Times: `15:00`, `午後3時30分`, `午後3時`, `午前11時30分`, `午前11時`,
//!   `15時30分`, `15時`
//!
//! A context with a time wins immediately. Otherwise the last date-only
//! context is returned with medium confidence and `has_time == false`.

use crate::html::{element_text, selector};
use crate::types::Timestamp;
use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_CONTEXTS: usize = 20;
const MAX_BLOCK_CHARS: usize = 500;
const MIN_CONTEXT_CHARS: usize = 10;
const RAW_TEXT_CHARS: usize = 200;

/// Reiwa 1 is 2019
const REIWA_OFFSET: i32 = 2018;

pub const EARNINGS_KEYWORDS: &[&str] = &[
    "決算発表",
    "決算発表予定",
    "決算短信",
    "四半期決算",
    "本決算",
    "業績発表",
    "決算日",
    "決算説明会",
    "earnings",
    "financial results",
];

/// Markers for "time not decided yet" (compared lowercase)
pub const UNDETERMINED_KEYWORDS: &[&str] = &["未定", "未確定", "調整中", "tbd", "undetermined"];

#[derive(Clone, Copy)]
enum DateForm {
    Gregorian,
    Reiwa,
}

#[derive(Clone, Copy)]
enum TimeForm {
    HourMinute,
    HourOnly,
    PmHourMinute,
    PmHourOnly,
    AmHourMinute,
    AmHourOnly,
}

static DATE_PATTERNS: Lazy<Vec<(Regex, DateForm)>> = Lazy::new(|| {
    [
        (r"(\d{4})年(\d{1,2})月(\d{1,2})日", DateForm::Gregorian),
        (r"(\d{4})/(\d{1,2})/(\d{1,2})", DateForm::Gregorian),
        (r"(\d{4})-(\d{1,2})-(\d{1,2})", DateForm::Gregorian),
        (r"令和(\d{1,2})年(\d{1,2})月(\d{1,2})日", DateForm::Reiwa),
    ]
    .into_iter()
    .map(|(p, form)| (Regex::new(p).expect("date pattern is valid"), form))
    .collect()
});

// More specific forms first: 午後3時 must not be read as 3時
static TIME_PATTERNS: Lazy<Vec<(Regex, TimeForm)>> = Lazy::new(|| {
    [
        (r"(\d{1,2}):(\d{2})", TimeForm::HourMinute),
        (r"午後(\d{1,2})時(\d{1,2})分", TimeForm::PmHourMinute),
        (r"午後(\d{1,2})時", TimeForm::PmHourOnly),
        (r"午前(\d{1,2})時(\d{1,2})分", TimeForm::AmHourMinute),
        (r"午前(\d{1,2})時", TimeForm::AmHourOnly),
        (r"(\d{1,2})時(\d{1,2})分", TimeForm::HourMinute),
        (r"(\d{1,2})時", TimeForm::HourOnly),
    ]
    .into_iter()
    .map(|(p, form)| (Regex::new(p).expect("time pattern is valid"), form))
    .collect()
});

/// How sure the parser is about one result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseConfidence {
    High,
    Medium,
    Low,
}

impl fmt::Display for ParseConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParseConfidence::High => "high",
            ParseConfidence::Medium => "medium",
            ParseConfidence::Low => "low",
        })
    }
}

/// Parsed announcement information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarningsInfo {
    /// Date at midnight when `has_time` is false
    pub datetime: Timestamp,
    pub confidence: ParseConfidence,
    /// Parser that produced the result ("rule")
    pub source: String,
    /// Start of the context the result came from
    pub raw_text: String,
    pub has_time: bool,
}

/// First recognised date in `text`
pub fn parse_japanese_date(text: &str) -> Option<NaiveDate> {
    for (pattern, form) in DATE_PATTERNS.iter() {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        let nums: Option<Vec<i32>> = (1..=3)
            .map(|i| caps.get(i).and_then(|m| m.as_str().parse().ok()))
            .collect();
        let Some(nums) = nums else {
            continue;
        };
        let year = match form {
            DateForm::Gregorian => nums[0],
            DateForm::Reiwa => REIWA_OFFSET + nums[0],
        };
        let (Ok(month), Ok(day)) = (u32::try_from(nums[1]), u32::try_from(nums[2])) else {
            continue;
        };
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }
    None
}

/// First recognised time in `text`
pub fn parse_japanese_time(text: &str) -> Option<NaiveTime> {
    for (pattern, form) in TIME_PATTERNS.iter() {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        let hour: u32 = match caps.get(1).and_then(|m| m.as_str().parse().ok()) {
            Some(h) => h,
            None => continue,
        };
        let minute: u32 = match form {
            TimeForm::HourMinute | TimeForm::PmHourMinute | TimeForm::AmHourMinute => {
                match caps.get(2).and_then(|m| m.as_str().parse().ok()) {
                    Some(m) => m,
                    None => continue,
                }
            }
            _ => 0,
        };
        let hour = match form {
            TimeForm::PmHourMinute | TimeForm::PmHourOnly if hour != 12 => hour + 12,
            TimeForm::AmHourMinute | TimeForm::AmHourOnly if hour == 12 => 0,
            _ => hour,
        };
        if let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) {
            return Some(time);
        }
    }
    None
}

pub fn has_undetermined_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    UNDETERMINED_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn has_earnings_keyword(text: &str) -> bool {
    EARNINGS_KEYWORDS.iter().any(|kw| text.contains(kw))
}

/// Parse one text context
pub fn parse_context(context: &str) -> Option<EarningsInfo> {
    let date = parse_japanese_date(context)?;
    let raw_text: String = context.chars().take(RAW_TEXT_CHARS).collect();

    let time = if has_undetermined_marker(context) {
        None
    } else {
        parse_japanese_time(context)
    };

    Some(match time {
        Some(time) => EarningsInfo {
            datetime: date.and_time(time),
            confidence: ParseConfidence::High,
            source: "rule".to_string(),
            raw_text,
            has_time: true,
        },
        None => EarningsInfo {
            datetime: date.and_time(NaiveTime::MIN),
            confidence: ParseConfidence::Medium,
            source: "rule".to_string(),
            raw_text,
            has_time: false,
        },
    })
}

/// Text blocks likely to hold the announcement datetime, in page order
pub fn find_earnings_contexts(document: &Html, code: Option<&str>) -> Vec<String> {
    let mut contexts = Vec::new();

    for table in document.select(&selector("table")) {
        if has_earnings_keyword(&element_text(table)) {
            for row in table.select(&selector("tr")) {
                let text = element_text(row);
                if !text.is_empty() {
                    contexts.push(text);
                }
            }
        }
    }

    for block in document.select(&selector("div, section, article, p, li")) {
        let text = element_text(block);
        if text.chars().count() < MAX_BLOCK_CHARS && has_earnings_keyword(&text) {
            contexts.push(text);
        }
    }

    if let Some(code) = code.filter(|c| !c.is_empty()) {
        for node in document.root_element().descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            if !text.contains(code) {
                continue;
            }
            let parent = node
                .ancestors()
                .filter_map(ElementRef::wrap)
                .find(|el| matches!(el.value().name(), "tr" | "div" | "p" | "li"));
            if let Some(parent) = parent {
                contexts.push(element_text(parent));
            }
        }
    }

    let mut unique: Vec<String> = Vec::new();
    for ctx in contexts {
        if ctx.chars().count() > MIN_CONTEXT_CHARS && !unique.contains(&ctx) {
            unique.push(ctx);
        }
    }
    unique.truncate(MAX_CONTEXTS);
    unique
}

/// Best announcement datetime on an IR page
pub fn parse_earnings_from_html(html: &str, code: Option<&str>) -> Option<EarningsInfo> {
    let document = Html::parse_document(html);
    let mut date_only = None;

    for context in find_earnings_contexts(&document, code) {
        if let Some(info) = parse_context(&context) {
            if info.has_time {
                return Some(info);
            }
            date_only = Some(info);
        }
    }
    date_only
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_parse_dates() {
        assert_eq!(parse_japanese_date("2026年2月13日に発表"), Some(date(2026, 2, 13)));
        assert_eq!(parse_japanese_date("予定 2026/02/13"), Some(date(2026, 2, 13)));
        assert_eq!(parse_japanese_date("2026-2-13"), Some(date(2026, 2, 13)));
        assert_eq!(parse_japanese_date("令和8年2月13日"), Some(date(2026, 2, 13)));
        assert_eq!(parse_japanese_date("2026年13月40日"), None);
        assert_eq!(parse_japanese_date("no date here"), None);
    }

    #[test]
    fn test_parse_times() {
        assert_eq!(parse_japanese_time("15:00 発表"), Some(time(15, 0)));
        assert_eq!(parse_japanese_time("午後3時30分"), Some(time(15, 30)));
        assert_eq!(parse_japanese_time("午後3時"), Some(time(15, 0)));
        assert_eq!(parse_japanese_time("午後12時"), Some(time(12, 0)));
        assert_eq!(parse_japanese_time("午前11時30分"), Some(time(11, 30)));
        assert_eq!(parse_japanese_time("午前12時"), Some(time(0, 0)));
        assert_eq!(parse_japanese_time("13時55分"), Some(time(13, 55)));
        assert_eq!(parse_japanese_time("16時"), Some(time(16, 0)));
        assert_eq!(parse_japanese_time("25:00"), None);
    }

    #[test]
    fn test_undetermined_marker_drops_time() {
        let info = parse_context("2026年2月13日 決算発表 時刻未定").unwrap();
        assert!(!info.has_time);
        assert_eq!(info.confidence, ParseConfidence::Medium);

        assert!(has_undetermined_marker("Time: TBD"));
    }

    #[test]
    fn test_context_with_time_is_high() {
        let info = parse_context("2026年2月13日(金) 15:00 決算発表").unwrap();
        assert!(info.has_time);
        assert_eq!(info.confidence, ParseConfidence::High);
        assert_eq!(info.datetime, date(2026, 2, 13).and_time(time(15, 0)));
        assert_eq!(info.source, "rule");
    }

    #[test]
    fn test_page_prefers_result_with_time() {
        let html = r#"
            <html><body>
              <p>2026年1月30日 決算説明会の資料を掲載しました</p>
              <table>
                <tr><th>日付</th><th>内容</th></tr>
                <tr><td>2026年2月13日</td><td>第3四半期決算発表 13:30</td></tr>
              </table>
            </body></html>"#;
        let info = parse_earnings_from_html(html, None).unwrap();
        assert_eq!(info.datetime, date(2026, 2, 13).and_time(time(13, 30)));
    }

    #[test]
    fn test_page_with_date_only() {
        let html = "<div><p>次回の決算発表予定日: 2026年5月12日</p></div>";
        let info = parse_earnings_from_html(html, None).unwrap();
        assert!(!info.has_time);
        assert_eq!(info.datetime.date(), date(2026, 5, 12));
    }

    #[test]
    fn test_code_context_found_without_keyword() {
        let html = "<ul><li>7203 トヨタ 2026/02/06 13:55</li></ul>";
        let info = parse_earnings_from_html(html, Some("7203")).unwrap();
        assert_eq!(info.datetime, date(2026, 2, 6).and_time(time(13, 55)));
    }

    #[test]
    fn test_short_and_irrelevant_pages() {
        assert!(parse_earnings_from_html("<p>決算日</p>", None).is_none());
        assert!(parse_earnings_from_html("<p>会社概要 2026年2月13日</p>", None).is_none());
    }
}
