//! Broker calendar sources
//!
//! Each source turns one date into `(code, name, datetime)` rows. Sources
//! only parse; code validation and logging of dropped rows happen in
//! [`fetch_validated`] so every source is treated alike.
//!
//! # Errors vs. no data
//! `Ok` with no rows means the source has no earnings for that day.
//! `Err` means the source could not be read; callers log it and leave the
//! source out of the run.

pub mod matsui;
pub mod sbi;
pub mod table;
pub mod tradersweb;

pub use matsui::MatsuiSource;
pub use sbi::SbiSource;
pub use tradersweb::TraderswebSource;

use crate::error::SourceError;
use crate::fetch::PageFetcher;
use crate::types::{CodeValidator, SourceRow, SourceTable, StockCode, Timestamp};
use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Row as parsed from a source, before code validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub code: String,
    pub name: Option<String>,
    pub datetime: Option<Timestamp>,
}

/// Parameters of a source health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckConfig {
    /// Date to fetch; `None` means the next weekday
    pub test_date: Option<NaiveDate>,
    pub min_rows: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            test_date: None,
            min_rows: 1,
        }
    }
}

/// Outcome of one health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub name: String,
    pub ok: bool,
    pub rows: usize,
    pub error: Option<String>,
}

impl HealthReport {
    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: false,
            rows: 0,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait EarningsSource: Send + Sync {
    /// Short tag used in column names (`sbi` gives `sbi_datetime`)
    fn name(&self) -> &'static str;

    fn health_check(&self) -> HealthCheckConfig {
        HealthCheckConfig::default()
    }

    /// Rows for `date` without code validation
    async fn fetch_raw(
        &self,
        fetcher: &dyn PageFetcher,
        date: NaiveDate,
    ) -> Result<Vec<RawRow>, SourceError>;
}

/// Fetch a source and drop rows whose code fails `validator`
pub async fn fetch_validated(
    source: &dyn EarningsSource,
    fetcher: &dyn PageFetcher,
    date: NaiveDate,
    validator: &dyn CodeValidator,
) -> Result<SourceTable, SourceError> {
    let raw = source.fetch_raw(fetcher, date).await?;
    let total = raw.len();

    let rows: Vec<SourceRow> = raw
        .into_iter()
        .filter_map(|row| {
            let code = StockCode::new(&row.code);
            validator.is_valid(&code).then(|| SourceRow {
                code,
                name: row.name.filter(|n| !n.trim().is_empty()),
                datetime: row.datetime,
            })
        })
        .collect();

    let dropped = total - rows.len();
    if dropped > 0 {
        warn!(source = source.name(), dropped, "Dropped rows with invalid codes");
    }
    debug!(source = source.name(), rows = rows.len(), %date, "Source fetched");

    Ok(SourceTable::new(source.name(), rows))
}

/// Run a source's health check
pub async fn check_source(
    source: &dyn EarningsSource,
    fetcher: &dyn PageFetcher,
    validator: &dyn CodeValidator,
    today: NaiveDate,
) -> HealthReport {
    let config = source.health_check();
    let date = config.test_date.unwrap_or_else(|| next_weekday(today));

    match fetch_validated(source, fetcher, date, validator).await {
        Ok(table) => {
            let rows = table.rows.len();
            let ok = rows >= config.min_rows;
            HealthReport {
                name: source.name().to_string(),
                ok,
                rows,
                error: (!ok).then(|| format!("Expected >= {} rows, got {}", config.min_rows, rows)),
            }
        }
        Err(e) => HealthReport::failed(source.name(), e.to_string()),
    }
}

/// First Monday–Friday strictly after `date`
pub fn next_weekday(date: NaiveDate) -> NaiveDate {
    let mut next = date + Duration::days(1);
    while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
        next += Duration::days(1);
    }
    next
}

/// Sources known to the aggregator, in registration order
#[derive(Clone)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn EarningsSource>>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(SbiSource));
        registry.register(Arc::new(MatsuiSource));
        registry.register(Arc::new(TraderswebSource));
        registry
    }
}

impl SourceRegistry {
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Add a source; a source with the same name is replaced in place
    pub fn register(&mut self, source: Arc<dyn EarningsSource>) {
        match self.sources.iter().position(|s| s.name() == source.name()) {
            Some(i) => self.sources[i] = source,
            None => self.sources.push(source),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EarningsSource>> {
        self.sources.iter().find(|s| s.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn all(&self) -> Vec<Arc<dyn EarningsSource>> {
        self.sources.clone()
    }

    /// Sources named in `names`, in the caller's order
    ///
    /// Unknown names are skipped with a warning; repeats are ignored.
    pub fn select(&self, names: &[String]) -> Vec<Arc<dyn EarningsSource>> {
        let mut selected: Vec<Arc<dyn EarningsSource>> = Vec::new();
        for name in names {
            let name = name.trim();
            if selected.iter().any(|s| s.name() == name) {
                continue;
            }
            match self.get(name) {
                Some(source) => selected.push(source),
                None => warn!(source = name, known = ?self.names(), "Unknown source"),
            }
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PatternCodeValidator;

    struct Fixed(Vec<RawRow>);

    #[async_trait]
    impl EarningsSource for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn fetch_raw(
            &self,
            _fetcher: &dyn PageFetcher,
            _date: NaiveDate,
        ) -> Result<Vec<RawRow>, SourceError> {
            Ok(self.0.clone())
        }
    }

    struct NoPages;

    #[async_trait]
    impl PageFetcher for NoPages {
        async fn fetch_page(&self, url: &str) -> Result<String, SourceError> {
            Err(SourceError::NotAvailable(url.to_string()))
        }
    }

    fn raw(code: &str, name: Option<&str>) -> RawRow {
        RawRow {
            code: code.to_string(),
            name: name.map(str::to_string),
            datetime: None,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 13).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_validated_drops_invalid_codes() {
        let source = Fixed(vec![
            raw("7203", Some("トヨタ自動車")),
            raw("72030", None),
            raw(" 130A ", Some(" ")),
            raw("", None),
        ]);
        let table = fetch_validated(&source, &NoPages, date(), &PatternCodeValidator::default())
            .await
            .unwrap();

        assert_eq!(table.source, "fixed");
        let codes: Vec<_> = table.rows.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["7203", "130A"]);
        assert_eq!(table.rows[1].name, None);
    }

    #[tokio::test]
    async fn test_health_check_reports_row_shortfall() {
        let validator = PatternCodeValidator::default();
        let report = check_source(&Fixed(vec![]), &NoPages, &validator, date()).await;
        assert!(!report.ok);
        assert_eq!(report.error.as_deref(), Some("Expected >= 1 rows, got 0"));

        let report = check_source(&Fixed(vec![raw("7203", None)]), &NoPages, &validator, date()).await;
        assert!(report.ok);
        assert_eq!(report.rows, 1);
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_health_check_reports_fetch_error() {
        let report = check_source(&SbiSource, &NoPages, &PatternCodeValidator::default(), date()).await;
        assert_eq!(report.name, "sbi");
        assert!(!report.ok);
        assert!(report.error.unwrap().starts_with("Not available"));
    }

    #[test]
    fn test_next_weekday_skips_weekend() {
        let friday = NaiveDate::from_ymd_opt(2026, 2, 13).unwrap();
        assert_eq!(next_weekday(friday), NaiveDate::from_ymd_opt(2026, 2, 16).unwrap());
        let monday = NaiveDate::from_ymd_opt(2026, 2, 16).unwrap();
        assert_eq!(next_weekday(monday), NaiveDate::from_ymd_opt(2026, 2, 17).unwrap());
    }

    #[test]
    fn test_registry_order_and_select() {
        let registry = SourceRegistry::default();
        assert_eq!(registry.names(), vec!["sbi", "matsui", "tradersweb"]);

        let names = vec!["tradersweb".to_string(), "nope".to_string(), "sbi".to_string(), "sbi".to_string()];
        let selected: Vec<_> = registry.select(&names).iter().map(|s| s.name()).collect();
        assert_eq!(selected, vec!["tradersweb", "sbi"]);
    }
}
