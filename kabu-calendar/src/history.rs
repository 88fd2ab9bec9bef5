//! Past announcements and time-of-day inference
//!
//! Companies tend to announce at the same wall-clock time every quarter.
//! Given a company's recent announcement datetimes, the most common time of
//! day is applied to the target date:
//!
//! | share of most common time      | confidence |
//! |--------------------------------|------------|
//! | only one distinct time, or ≥75% | high       |
//! | ≥50%                           | medium     |
//! | otherwise                      | low        |
//! | no history                     | none       |

use crate::error::SourceError;
use crate::fetch::PageFetcher;
use crate::html::{element_text, selector};
use crate::types::{time_of_day, StockCode, Timestamp};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of past announcement datetimes
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Up to `limit` past announcements, most recent first
    async fn past_earnings(
        &self,
        code: &StockCode,
        limit: usize,
    ) -> Result<Vec<Timestamp>, SourceError>;
}

/// Confidence of a history-based inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryConfidence {
    High,
    Medium,
    Low,
    None,
}

impl fmt::Display for HistoryConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HistoryConfidence::High => "high",
            HistoryConfidence::Medium => "medium",
            HistoryConfidence::Low => "low",
            HistoryConfidence::None => "none",
        })
    }
}

/// Result of inferring one company's announcement datetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inference {
    pub datetime: Option<Timestamp>,
    pub confidence: HistoryConfidence,
    /// History the inference was based on, most recent first
    pub history: Vec<Timestamp>,
}

/// Apply the dominant past time of day to `date`
///
/// Among equally common times the one seen first (most recent) wins.
pub fn infer_datetime(date: NaiveDate, history: &[Timestamp]) -> Inference {
    if history.is_empty() {
        return Inference {
            datetime: None,
            confidence: HistoryConfidence::None,
            history: Vec::new(),
        };
    }

    let mut counts: Vec<((u32, u32), usize)> = Vec::new();
    for ts in history {
        let tod = time_of_day(ts);
        match counts.iter_mut().find(|(key, _)| *key == tod) {
            Some((_, n)) => *n += 1,
            None => counts.push((tod, 1)),
        }
    }

    let mut best = counts[0];
    for entry in &counts[1..] {
        if entry.1 > best.1 {
            best = *entry;
        }
    }
    let ((hour, minute), count) = best;

    let share = count as f64 / history.len() as f64;
    let confidence = if counts.len() == 1 || share >= 0.75 {
        HistoryConfidence::High
    } else if share >= 0.5 {
        HistoryConfidence::Medium
    } else {
        HistoryConfidence::Low
    };

    Inference {
        datetime: NaiveTime::from_hms_opt(hour, minute, 0).map(|t| date.and_time(t)),
        confidence,
        history: history.to_vec(),
    }
}

/// Infer from a prefetched history, or fetch it first
///
/// A provider failure is logged and treated as an empty history.
pub async fn infer(
    provider: &dyn HistoryProvider,
    code: &StockCode,
    date: NaiveDate,
    prefetched: Option<Vec<Timestamp>>,
    limit: usize,
) -> Inference {
    let history = match prefetched {
        Some(history) => history,
        None => match provider.past_earnings(code, limit).await {
            Ok(history) => history,
            Err(e) => {
                warn!(code = %code, error = %e, "History lookup failed");
                Vec::new()
            }
        },
    };
    infer_datetime(date, &history)
}

/// History from the kabutan.jp per-stock news page (earnings filter)
pub struct KabutanHistory {
    fetcher: Arc<dyn PageFetcher>,
    url_template: String,
}

const EARNINGS_CATEGORY: &str = "決算";

impl KabutanHistory {
    /// `url_template` must contain `{code}`
    pub fn new(fetcher: Arc<dyn PageFetcher>, url_template: impl Into<String>) -> Self {
        Self {
            fetcher,
            url_template: url_template.into(),
        }
    }

    fn url_for(&self, code: &StockCode) -> String {
        self.url_template.replace("{code}", code.as_str())
    }
}

#[async_trait]
impl HistoryProvider for KabutanHistory {
    async fn past_earnings(
        &self,
        code: &StockCode,
        limit: usize,
    ) -> Result<Vec<Timestamp>, SourceError> {
        let html = self.fetcher.fetch_page(&self.url_for(code)).await?;
        let history = parse_news_history(&html, limit);
        debug!(code = %code, entries = history.len(), "Fetched earnings history");
        Ok(history)
    }
}

/// Earnings rows of a news table, most recent first
///
/// Rows have three cells: datetime (`25/01/20 15:00`), category, title.
/// Only the `決算` category is kept.
pub fn parse_news_history(html: &str, limit: usize) -> Vec<Timestamp> {
    let document = Html::parse_document(html);
    let cell_selector = selector("td, th");
    let time_selector = selector("time[datetime]");
    let mut history = Vec::new();

    for row in document.select(&selector("tr")) {
        let cells: Vec<_> = row.select(&cell_selector).collect();
        if cells.len() != 3 || element_text(cells[1]) != EARNINGS_CATEGORY {
            continue;
        }

        let parsed = NaiveDateTime::parse_from_str(&element_text(cells[0]), "%y/%m/%d %H:%M")
            .ok()
            .or_else(|| {
                cells[0]
                    .select(&time_selector)
                    .next()
                    .and_then(|t| t.value().attr("datetime"))
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|dt| dt.naive_local())
            });

        if let Some(ts) = parsed {
            history.push(ts);
            if history.len() >= limit {
                break;
            }
        }
    }
    history
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, mi, 0).unwrap()
    }

    fn target() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 13).unwrap()
    }

    #[test]
    fn test_empty_history() {
        let inference = infer_datetime(target(), &[]);
        assert_eq!(inference.confidence, HistoryConfidence::None);
        assert!(inference.datetime.is_none());
    }

    #[test]
    fn test_single_time_is_high() {
        let history = vec![at(2025, 11, 7, 15, 0), at(2025, 8, 8, 15, 0)];
        let inference = infer_datetime(target(), &history);
        assert_eq!(inference.confidence, HistoryConfidence::High);
        assert_eq!(inference.datetime, Some(at(2026, 2, 13, 15, 0)));
        assert_eq!(inference.history, history);
    }

    #[test]
    fn test_majority_thresholds() {
        let three_of_four = vec![
            at(2025, 11, 7, 15, 0),
            at(2025, 8, 8, 15, 0),
            at(2025, 5, 9, 13, 30),
            at(2025, 2, 7, 15, 0),
        ];
        assert_eq!(infer_datetime(target(), &three_of_four).confidence, HistoryConfidence::High);

        let half = vec![
            at(2025, 11, 7, 13, 30),
            at(2025, 8, 8, 15, 0),
            at(2025, 5, 9, 15, 0),
            at(2025, 2, 7, 11, 0),
        ];
        let inference = infer_datetime(target(), &half);
        assert_eq!(inference.confidence, HistoryConfidence::Medium);
        assert_eq!(inference.datetime, Some(at(2026, 2, 13, 15, 0)));

        let scattered = vec![at(2025, 11, 7, 13, 30), at(2025, 8, 8, 15, 0), at(2025, 5, 9, 11, 0)];
        let inference = infer_datetime(target(), &scattered);
        assert_eq!(inference.confidence, HistoryConfidence::Low);
        // Tie: most recent time wins
        assert_eq!(inference.datetime, Some(at(2026, 2, 13, 13, 30)));
    }

    #[tokio::test]
    async fn test_prefetched_history_skips_provider() {
        struct Failing;
        #[async_trait]
        impl HistoryProvider for Failing {
            async fn past_earnings(&self, _: &StockCode, _: usize) -> Result<Vec<Timestamp>, SourceError> {
                Err(SourceError::Network("unreachable".into()))
            }
        }

        let code = StockCode::new("7203");
        let inference = infer(&Failing, &code, target(), Some(vec![at(2025, 11, 7, 13, 55)]), 8).await;
        assert_eq!(inference.datetime, Some(at(2026, 2, 13, 13, 55)));

        let inference = infer(&Failing, &code, target(), None, 8).await;
        assert_eq!(inference.confidence, HistoryConfidence::None);
    }

    #[test]
    fn test_parse_news_history() {
        let html = r#"
            <table class="s_news_list">
              <tr><td class="news_time"><time datetime="2025-11-07T13:55:00+09:00">25/11/07 13:55</time></td>
                  <td><div class="newslist_ctg">決算</div></td><td>トヨタ、今期税引き前を上方修正</td></tr>
              <tr><td><time datetime="2025-10-01T09:00:00+09:00">25/10/01 09:00</time></td>
                  <td><div>開示</div></td><td>人事異動のお知らせ</td></tr>
              <tr><td><time datetime="2025-08-07T13:55:00+09:00">25/08/07 13:55</time></td>
                  <td><div>決算</div></td><td>4-6月期(1Q)決算</td></tr>
              <tr><td><time datetime="2025-05-08T13:55:00+09:00">-</time></td>
                  <td><div>決算</div></td><td>本決算</td></tr>
            </table>"#;

        let history = parse_news_history(html, 8);
        assert_eq!(
            history,
            vec![at(2025, 11, 7, 13, 55), at(2025, 8, 7, 13, 55), at(2025, 5, 8, 13, 55)]
        );

        assert_eq!(parse_news_history(html, 1).len(), 1);
    }
}
