//! Core data types shared by the calendar pipeline
//!
//! # Observations
//! Every row carries one optional timestamp per source. IR and history
//! inference have fixed fields; calendar sources are a runtime list kept in
//! canonical order (the order sources were selected for the run).
//!
//! All timestamps are naive Tokyo wall-clock values. "Absent" is always
//! `None`, never midnight.

use chrono::{NaiveDateTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Naive Asia/Tokyo local datetime
pub type Timestamp = NaiveDateTime;

/// Exchange stock code (e.g. "7203", "130A")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockCode(String);

impl StockCode {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StockCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StockCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Reconciled confidence label, ordered weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
    Highest,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
            Confidence::Highest => "highest",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            "highest" => Ok(Confidence::Highest),
            other => Err(format!("unknown confidence '{}'", other)),
        }
    }
}

/// Hour and minute of a timestamp; seconds never take part in agreement
pub fn time_of_day(ts: &Timestamp) -> (u32, u32) {
    (ts.hour(), ts.minute())
}

/// One calendar source's value for a row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScraperObservation {
    pub source: String,
    pub at: Option<Timestamp>,
}

/// All per-source values for one stock code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observations {
    pub ir: Option<Timestamp>,
    pub inferred: Option<Timestamp>,
    /// Calendar sources in canonical order
    pub scrapers: Vec<ScraperObservation>,
}

impl Observations {
    /// Present calendar-source values, canonical order
    pub fn scraper_values(&self) -> Vec<Timestamp> {
        self.scrapers.iter().filter_map(|s| s.at).collect()
    }

    /// Every present value: IR, inferred, then calendar sources
    pub fn present(&self) -> Vec<Timestamp> {
        self.ir
            .into_iter()
            .chain(self.inferred)
            .chain(self.scraper_values())
            .collect()
    }

    /// Value reported by the named calendar source
    pub fn scraper(&self, source: &str) -> Option<Timestamp> {
        self.scrapers
            .iter()
            .find(|s| s.source == source)
            .and_then(|s| s.at)
    }
}

/// One merged row, keyed by stock code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRow {
    pub code: StockCode,
    pub name: Option<String>,
    pub observations: Observations,
    /// Past announcements, most recent first
    pub history: Vec<Timestamp>,
}

impl EntityRow {
    pub fn new(code: StockCode) -> Self {
        Self {
            code,
            name: None,
            observations: Observations::default(),
            history: Vec::new(),
        }
    }
}

/// Outcome of reconciling one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Distinct candidate instants, preferred first
    pub candidates: Vec<Timestamp>,
    /// First candidate, or `None` when nothing was observed
    pub selected: Option<Timestamp>,
    pub confidence: Confidence,
}

impl Reconciliation {
    /// Result for a row with no observation at all
    pub fn unknown() -> Self {
        Self {
            candidates: Vec::new(),
            selected: None,
            confidence: Confidence::Low,
        }
    }
}

/// One row reported by a calendar source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    pub code: StockCode,
    pub name: Option<String>,
    pub datetime: Option<Timestamp>,
}

/// A calendar source's validated rows for one date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTable {
    pub source: String,
    pub rows: Vec<SourceRow>,
}

impl SourceTable {
    pub fn new(source: impl Into<String>, rows: Vec<SourceRow>) -> Self {
        Self {
            source: source.into(),
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Pluggable stock code rule
pub trait CodeValidator: Send + Sync {
    fn is_valid(&self, code: &StockCode) -> bool;
}

/// Regex-backed code rule
#[derive(Debug, Clone)]
pub struct PatternCodeValidator {
    pattern: Regex,
}

impl PatternCodeValidator {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl Default for PatternCodeValidator {
    fn default() -> Self {
        Self {
            pattern: Regex::new(kabu_common::config::DEFAULT_CODE_PATTERN)
                .expect("default code pattern is a valid regex"),
        }
    }
}

impl CodeValidator for PatternCodeValidator {
    fn is_valid(&self, code: &StockCode) -> bool {
        self.pattern.is_match(code.as_str())
    }
}
