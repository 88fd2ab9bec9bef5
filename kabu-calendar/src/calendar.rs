//! Calendar aggregation
//!
//! # Stages
//! 1. Fetch every selected source in parallel (one task per source)
//! 2. Drop failed and empty sources, order the rest by the run's source list
//! 3. Merge on stock code
//! 4. History + inference, one task per code
//! 5. IR lookup, one task per code
//! 6. Reconcile each row and classify its trading session (inline)
//! 7. Assemble the output table
//!
//! Only an unparseable date is raised to the caller. Source and provider
//! failures are logged and leave their values absent; a run where nothing
//! returned data yields [`Calendar::empty`].

use crate::context::{AppContext, ContextFetcher};
use crate::error::{CalendarError, Result};
use crate::fetch::PageFetcher;
use crate::history::{infer, infer_datetime, HistoryProvider, Inference, KabutanHistory};
use crate::ir::discovery::{CuratedDiscovery, IrDiscovery};
use crate::ir::{CachedIrProvider, IrObservation, IrPageInfo, IrProvider};
use crate::merge::merge_sources;
use crate::output::{columns_for, Calendar, CalendarRow};
use crate::parallel::{task, ParallelRunner, Task};
use crate::sources::{check_source, fetch_validated, next_weekday, HealthReport, SourceRegistry};
use crate::types::{CodeValidator, Confidence, StockCode, Timestamp};
use chrono::{Local, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requests one source task may make (Matsui pages through results)
const SOURCE_TASK_REQUESTS: u32 = 10;
/// Requests one history task may make
const HISTORY_TASK_REQUESTS: u32 = 2;
/// Requests one IR task may make (discovery plus the page itself)
const IR_TASK_REQUESTS: u32 = 3;

/// Options of one calendar run
#[derive(Debug, Clone)]
pub struct CalendarOptions {
    /// Sources to run, in order; `None` uses the configured list
    pub sources: Option<Vec<String>>,
    pub infer_from_history: bool,
    pub include_ir: bool,
    /// Ignore cached IR datetimes and look again
    pub ir_eager: bool,
}

impl Default for CalendarOptions {
    fn default() -> Self {
        Self {
            sources: None,
            infer_from_history: true,
            include_ir: true,
            ir_eager: false,
        }
    }
}

/// Single-code report for the `lookup` command
#[derive(Debug, Clone)]
pub struct LookupReport {
    pub code: StockCode,
    /// Inference applied to the next weekday
    pub inference: Inference,
    pub ir_page: Option<IrPageInfo>,
    pub ir: Option<IrObservation>,
}

impl LookupReport {
    pub fn history(&self) -> &[Timestamp] {
        &self.inference.history
    }
}

/// Providers resolved for one run
struct RunParts {
    fetcher: Arc<dyn PageFetcher>,
    history: Arc<dyn HistoryProvider>,
    discovery: Arc<dyn IrDiscovery>,
    ir: Arc<dyn IrProvider>,
}

/// Entry point of the calendar pipeline
///
/// Providers left unset are built from the context's current settings at the
/// start of every run, so a `reconfigure` between runs takes effect on the
/// next one.
pub struct Aggregator {
    ctx: Arc<AppContext>,
    registry: SourceRegistry,
    fetcher: Option<Arc<dyn PageFetcher>>,
    history: Option<Arc<dyn HistoryProvider>>,
    discovery: Option<Arc<dyn IrDiscovery>>,
    ir: Option<Arc<dyn IrProvider>>,
}

impl Aggregator {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            registry: SourceRegistry::default(),
            fetcher: None,
            history: None,
            discovery: None,
            ir: None,
        }
    }

    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Page fetcher handed to calendar sources
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryProvider>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn IrDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_ir(mut self, ir: Arc<dyn IrProvider>) -> Self {
        self.ir = Some(ir);
        self
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    fn parts(&self) -> RunParts {
        let settings = self.ctx.settings();
        let fetcher = self
            .fetcher
            .clone()
            .unwrap_or_else(|| Arc::new(ContextFetcher::calendar(Arc::clone(&self.ctx))));
        let history = self.history.clone().unwrap_or_else(|| {
            Arc::new(KabutanHistory::new(
                Arc::clone(&fetcher),
                settings.history_url.clone(),
            ))
        });

        let cache = self.ctx.ir_cache();
        let discovery = self
            .discovery
            .clone()
            .unwrap_or_else(|| Arc::new(CuratedDiscovery::new(Arc::clone(&cache))));
        let ir = self.ir.clone().unwrap_or_else(|| {
            Arc::new(CachedIrProvider::new(
                Arc::clone(&discovery),
                cache,
                Arc::new(ContextFetcher::ir(Arc::clone(&self.ctx))),
            ))
        });

        RunParts {
            fetcher,
            history,
            discovery,
            ir,
        }
    }

    /// Build the calendar for `date` (`YYYY-MM-DD`)
    pub async fn get_calendar(&self, date: &str, options: &CalendarOptions) -> Result<Calendar> {
        let date = parse_date(date)?;
        let settings = self.ctx.settings();
        let parts = self.parts();
        let validator: Arc<dyn CodeValidator> = Arc::new(self.ctx.code_validator()?);

        let names = options.sources.clone().unwrap_or_else(|| settings.sources.clone());
        let sources = self.registry.select(&names);
        if sources.is_empty() {
            warn!(requested = ?names, "No known sources selected");
            return Ok(Calendar::empty());
        }

        info!(%date, sources = ?sources.iter().map(|s| s.name()).collect::<Vec<_>>(), "Stage 1: fetching sources");
        let runner = runner_for(&settings, settings.timeout() * SOURCE_TASK_REQUESTS);
        let tasks: Vec<(String, Task<_>)> = sources
            .iter()
            .map(|source| {
                let source = Arc::clone(source);
                let fetcher = Arc::clone(&parts.fetcher);
                let validator = Arc::clone(&validator);
                let name = source.name().to_string();
                let fetch = task(move || async move {
                    Ok(fetch_validated(&*source, &*fetcher, date, &*validator).await?)
                });
                (name, fetch)
            })
            .collect();
        let mut fetched = runner.run(tasks).await;

        let tables: Vec<_> = sources
            .iter()
            .filter_map(|source| {
                let table = fetched.remove(source.name())?;
                if table.is_empty() {
                    info!(source = source.name(), %date, "Source has no earnings for date");
                    return None;
                }
                Some(table)
            })
            .collect();
        if tables.is_empty() {
            warn!(%date, "No source returned data");
            return Ok(Calendar::empty());
        }

        let mut merged = merge_sources(&tables)?;
        info!(rows = merged.rows.len(), sources = ?merged.sources, "Stage 3: merged sources");

        if options.infer_from_history {
            let codes: Vec<StockCode> = merged.rows.iter().map(|r| r.code.clone()).collect();
            let runner = runner_for(&settings, settings.timeout() * HISTORY_TASK_REQUESTS);
            let mut inferences =
                infer_all(&runner, &parts.history, &codes, date, settings.history_limit).await;
            for row in &mut merged.rows {
                if let Some(inference) = inferences.remove(row.code.as_str()) {
                    row.observations.inferred = inference.datetime;
                    row.history = inference.history;
                }
            }
            info!(codes = codes.len(), "Stage 4: history inference finished");
        }

        if options.include_ir {
            let codes: Vec<StockCode> = merged.rows.iter().map(|r| r.code.clone()).collect();
            let runner = runner_for(&settings, settings.ir_timeout() * IR_TASK_REQUESTS);
            let tasks: Vec<(String, Task<Option<IrObservation>>)> = codes
                .iter()
                .map(|code| {
                    let ir = Arc::clone(&parts.ir);
                    let code = code.clone();
                    let eager = options.ir_eager;
                    let name = code.to_string();
                    (name, task(move || async move { Ok(ir.lookup(&code, eager).await?) }))
                })
                .collect();
            let mut found = runner.run(tasks).await;

            let mut hits = 0;
            for row in &mut merged.rows {
                if let Some(observation) = found.remove(row.code.as_str()).flatten() {
                    debug!(code = %row.code, method = %observation.method, datetime = %observation.datetime, "IR datetime");
                    row.observations.ir = Some(observation.datetime);
                    hits += 1;
                }
            }
            info!(codes = codes.len(), hits, "Stage 5: IR lookup finished");
        }

        let rows: Vec<CalendarRow> = merged.rows.into_iter().map(CalendarRow::from_entity).collect();
        let columns = columns_for(options.include_ir, &merged.sources, options.infer_from_history);
        let calendar = Calendar::new(columns, rows);

        let count = |level: Confidence| calendar.rows.iter().filter(|r| r.confidence == level).count();
        info!(
            %date,
            rows = calendar.len(),
            highest = count(Confidence::Highest),
            high = count(Confidence::High),
            medium = count(Confidence::Medium),
            low = count(Confidence::Low),
            "Calendar assembled"
        );
        Ok(calendar)
    }

    /// Health check of every registered source, in registration order
    pub async fn check_sources(&self) -> Vec<HealthReport> {
        let settings = self.ctx.settings();
        let parts = self.parts();
        let validator: Arc<dyn CodeValidator> = match self.ctx.code_validator() {
            Ok(rule) => Arc::new(rule),
            Err(e) => {
                return self
                    .registry
                    .names()
                    .into_iter()
                    .map(|name| HealthReport::failed(name, e.to_string()))
                    .collect()
            }
        };
        let today = Local::now().date_naive();

        let sources = self.registry.all();
        let tasks: Vec<(String, Task<HealthReport>)> = sources
            .iter()
            .map(|source| {
                let source = Arc::clone(source);
                let fetcher = Arc::clone(&parts.fetcher);
                let validator = Arc::clone(&validator);
                let name = source.name().to_string();
                let check = task(move || async move {
                    Ok(check_source(&*source, &*fetcher, &*validator, today).await)
                });
                (name, check)
            })
            .collect();
        let mut reports = runner_for(&settings, settings.timeout() * SOURCE_TASK_REQUESTS)
            .run(tasks)
            .await;

        sources
            .iter()
            .map(|source| {
                reports.remove(source.name()).unwrap_or_else(|| {
                    HealthReport::failed(source.name(), "Health check did not complete")
                })
            })
            .collect()
    }

    /// History, inference and optionally the IR page for one code
    pub async fn lookup(&self, code: &str, n_history: usize, include_ir: bool) -> Result<LookupReport> {
        let code = StockCode::new(code);
        if code.as_str().is_empty() {
            return Err(kabu_common::Error::InvalidInput("Stock code is empty".to_string()).into());
        }
        let parts = self.parts();

        let history = match parts.history.past_earnings(&code, n_history).await {
            Ok(history) => history,
            Err(e) => {
                warn!(code = %code, error = %e, "History lookup failed");
                Vec::new()
            }
        };
        let target = next_weekday(Local::now().date_naive());
        let inference = infer_datetime(target, &history);

        let (ir_page, ir) = if include_ir {
            let page = parts.discovery.discover(&code).await.unwrap_or_else(|e| {
                warn!(code = %code, error = %e, "IR discovery failed");
                None
            });
            let observation = parts.ir.lookup(&code, false).await.unwrap_or_else(|e| {
                warn!(code = %code, error = %e, "IR lookup failed");
                None
            });
            (page, observation)
        } else {
            (None, None)
        };

        Ok(LookupReport {
            code,
            inference,
            ir_page,
            ir,
        })
    }
}

/// One inference task per code
async fn infer_all(
    runner: &ParallelRunner,
    history: &Arc<dyn HistoryProvider>,
    codes: &[StockCode],
    date: NaiveDate,
    limit: usize,
) -> HashMap<String, Inference> {
    let tasks: Vec<(String, Task<Inference>)> = codes
        .iter()
        .map(|code| {
            let history = Arc::clone(history);
            let code = code.clone();
            let name = code.to_string();
            let lookup = task(move || async move { Ok(infer(&*history, &code, date, None, limit).await) });
            (name, lookup)
        })
        .collect();
    runner.run(tasks).await
}

fn runner_for(settings: &kabu_common::Settings, task_timeout: Duration) -> ParallelRunner {
    ParallelRunner::new(settings.max_workers).with_task_timeout(task_timeout)
}

/// Parse a `YYYY-MM-DD` target date
pub fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| CalendarError::InvalidDate(date.to_string()))
}
