//! Test helpers: offline sources and providers for pipeline tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use kabu_calendar::error::SourceError;
use kabu_calendar::fetch::PageFetcher;
use kabu_calendar::history::HistoryProvider;
use kabu_calendar::ir::{IrObservation, IrProvider, ParseConfidence};
use kabu_calendar::sources::{EarningsSource, HealthCheckConfig, RawRow, SourceRegistry};
use kabu_calendar::{Aggregator, AppContext, StockCode, Timestamp};
use kabu_common::Settings;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub const DATE: &str = "2026-02-10";

pub fn at(day: u32, h: u32, m: u32) -> Timestamp {
    NaiveDate::from_ymd_opt(2026, 2, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

/// Calendar source answering from memory
pub struct MockSource {
    name: &'static str,
    rows: Result<Vec<RawRow>, SourceError>,
}

impl MockSource {
    pub fn new(name: &'static str, rows: &[(&str, Option<Timestamp>)]) -> Self {
        Self {
            name,
            rows: Ok(rows
                .iter()
                .map(|(code, datetime)| RawRow {
                    code: code.to_string(),
                    name: Some(format!("{} 株式会社", code)),
                    datetime: *datetime,
                })
                .collect()),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            name,
            rows: Err(SourceError::HttpStatus {
                status: 503,
                url: format!("https://{}.example/", name),
            }),
        }
    }
}

#[async_trait]
impl EarningsSource for MockSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn health_check(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            test_date: NaiveDate::from_ymd_opt(2026, 2, 10),
            min_rows: 1,
        }
    }

    async fn fetch_raw(
        &self,
        _fetcher: &dyn PageFetcher,
        _date: NaiveDate,
    ) -> Result<Vec<RawRow>, SourceError> {
        self.rows.clone()
    }
}

/// Fetcher for tests that must not touch the network
pub struct OfflineFetcher;

#[async_trait]
impl PageFetcher for OfflineFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, SourceError> {
        Err(SourceError::NotAvailable(format!("offline: {}", url)))
    }
}

/// History keyed by code; counts calls
#[derive(Default)]
pub struct MockHistory {
    history: HashMap<String, Vec<Timestamp>>,
    pub calls: AtomicUsize,
}

impl MockHistory {
    pub fn with(mut self, code: &str, history: Vec<Timestamp>) -> Self {
        self.history.insert(code.to_string(), history);
        self
    }
}

#[async_trait]
impl HistoryProvider for MockHistory {
    async fn past_earnings(
        &self,
        code: &StockCode,
        limit: usize,
    ) -> Result<Vec<Timestamp>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.history.get(code.as_str()) {
            Some(history) => Ok(history.iter().take(limit).copied().collect()),
            None => Err(SourceError::NotAvailable(format!("no history for {}", code))),
        }
    }
}

/// IR datetimes keyed by code; records the last `eager` flag
#[derive(Default)]
pub struct MockIr {
    datetimes: HashMap<String, Timestamp>,
    pub calls: AtomicUsize,
    pub saw_eager: AtomicBool,
}

impl MockIr {
    pub fn with(mut self, code: &str, datetime: Timestamp) -> Self {
        self.datetimes.insert(code.to_string(), datetime);
        self
    }
}

#[async_trait]
impl IrProvider for MockIr {
    async fn lookup(
        &self,
        code: &StockCode,
        eager: bool,
    ) -> Result<Option<IrObservation>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if eager {
            self.saw_eager.store(true, Ordering::SeqCst);
        }
        Ok(self.datetimes.get(code.as_str()).map(|datetime| IrObservation {
            datetime: *datetime,
            parse_confidence: ParseConfidence::High,
            method: "mock".to_string(),
        }))
    }
}

pub fn test_context(cache_dir: &Path) -> Arc<AppContext> {
    AppContext::new(Settings {
        cache_dir: cache_dir.to_path_buf(),
        ..Settings::default()
    })
    .unwrap()
}

/// Aggregator wired to in-memory sources and providers
pub fn aggregator(
    ctx: Arc<AppContext>,
    sources: Vec<MockSource>,
    history: Arc<MockHistory>,
    ir: Arc<MockIr>,
) -> Aggregator {
    let mut registry = SourceRegistry::empty();
    for source in sources {
        registry.register(Arc::new(source));
    }
    Aggregator::new(ctx)
        .with_registry(registry)
        .with_fetcher(Arc::new(OfflineFetcher))
        .with_history(history)
        .with_ir(ir)
}
