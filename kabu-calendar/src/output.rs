//! Calendar assembly and export
//!
//! A [`Calendar`] is the final table of one run. Its column list records
//! which sources actually ran: a source that was not selected, or returned
//! nothing, has no column at all.
//!
//! # Column order
//! `code, name, datetime, confidence, during_trading_hours,
//! candidate_datetimes, ir_datetime, <source>_datetime…, inferred_datetime,
//! past_datetimes`
//!
//! # Export formats
//! | extension         | format                                      |
//! |-------------------|---------------------------------------------|
//! | `.csv`            | UTF-8 with BOM, lists joined with `"; "`    |
//! | `.json`           | array of records, column order preserved    |
//! | `.db` / `.sqlite` | SQLite table `earnings`, replaced each time |

use crate::error::{CalendarError, Result};
use crate::reconcile::reconcile;
use crate::trading_hours::is_during_trading_hours;
use crate::types::{Confidence, EntityRow, Observations, ScraperObservation, StockCode, Timestamp};
use serde_json::{Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::Row;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;
use tracing::info;
use unicode_width::UnicodeWidthStr;

pub const DEFAULT_TABLE: &str = "earnings";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LIST_SEPARATOR: &str = "; ";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One output column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Column {
    Code,
    Name,
    Datetime,
    Confidence,
    DuringTradingHours,
    CandidateDatetimes,
    IrDatetime,
    /// `<source>_datetime` for a calendar source
    Source(String),
    InferredDatetime,
    PastDatetimes,
}

impl Column {
    pub fn name(&self) -> String {
        match self {
            Column::Code => "code".to_string(),
            Column::Name => "name".to_string(),
            Column::Datetime => "datetime".to_string(),
            Column::Confidence => "confidence".to_string(),
            Column::DuringTradingHours => "during_trading_hours".to_string(),
            Column::CandidateDatetimes => "candidate_datetimes".to_string(),
            Column::IrDatetime => "ir_datetime".to_string(),
            Column::Source(source) => format!("{}_datetime", source),
            Column::InferredDatetime => "inferred_datetime".to_string(),
            Column::PastDatetimes => "past_datetimes".to_string(),
        }
    }

    /// Inverse of [`Column::name`]; any other `*_datetime` is a source column
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "code" => Column::Code,
            "name" => Column::Name,
            "datetime" => Column::Datetime,
            "confidence" => Column::Confidence,
            "during_trading_hours" => Column::DuringTradingHours,
            "candidate_datetimes" => Column::CandidateDatetimes,
            "ir_datetime" => Column::IrDatetime,
            "inferred_datetime" => Column::InferredDatetime,
            "past_datetimes" => Column::PastDatetimes,
            other => {
                let source = other.strip_suffix("_datetime")?;
                if source.is_empty() {
                    return None;
                }
                Column::Source(source.to_string())
            }
        })
    }

    fn kind(&self) -> CellKind {
        match self {
            Column::Code | Column::Name | Column::Confidence => CellKind::Text,
            Column::DuringTradingHours => CellKind::Flag,
            Column::CandidateDatetimes | Column::PastDatetimes => CellKind::Times,
            _ => CellKind::Time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Text,
    Flag,
    Time,
    Times,
}

/// Column list for a run
pub fn columns_for(include_ir: bool, sources: &[String], include_history: bool) -> Vec<Column> {
    let mut columns = vec![
        Column::Code,
        Column::Name,
        Column::Datetime,
        Column::Confidence,
        Column::DuringTradingHours,
        Column::CandidateDatetimes,
    ];
    if include_ir {
        columns.push(Column::IrDatetime);
    }
    columns.extend(sources.iter().cloned().map(Column::Source));
    if include_history {
        columns.push(Column::InferredDatetime);
        columns.push(Column::PastDatetimes);
    }
    columns
}

/// Value of one cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell<'a> {
    Text(Option<&'a str>),
    Flag(bool),
    Time(Option<Timestamp>),
    Times(&'a [Timestamp]),
}

impl Cell<'_> {
    /// Flat text form used by CSV, SQLite and the text table
    pub fn to_text(&self) -> String {
        match self {
            Cell::Text(text) => text.unwrap_or_default().to_string(),
            Cell::Flag(flag) => flag.to_string(),
            Cell::Time(ts) => ts.as_ref().map(format_timestamp).unwrap_or_default(),
            Cell::Times(list) => list
                .iter()
                .map(format_timestamp)
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Cell::Text(text) => text.map_or(Value::Null, |t| Value::String(t.to_string())),
            Cell::Flag(flag) => Value::Bool(*flag),
            Cell::Time(ts) => ts.map_or(Value::Null, |t| Value::String(format_timestamp(&t))),
            Cell::Times(list) => Value::Array(
                list.iter()
                    .map(|t| Value::String(format_timestamp(t)))
                    .collect(),
            ),
        }
    }
}

pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(text: &str) -> Option<Timestamp> {
    Timestamp::parse_from_str(text.trim(), TIMESTAMP_FORMAT).ok()
}

/// One reconciled row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarRow {
    pub code: StockCode,
    pub name: Option<String>,
    pub datetime: Option<Timestamp>,
    pub confidence: Confidence,
    pub during_trading_hours: bool,
    pub candidates: Vec<Timestamp>,
    pub observations: Observations,
    /// Past announcements, most recent first
    pub history: Vec<Timestamp>,
}

impl CalendarRow {
    /// Reconcile a merged row and classify its trading session
    pub fn from_entity(entity: EntityRow) -> Self {
        let reconciled = reconcile(&entity.observations);
        Self {
            code: entity.code,
            name: entity.name,
            datetime: reconciled.selected,
            confidence: reconciled.confidence,
            during_trading_hours: is_during_trading_hours(reconciled.selected),
            candidates: reconciled.candidates,
            observations: entity.observations,
            history: entity.history,
        }
    }

    pub fn cell(&self, column: &Column) -> Cell<'_> {
        match column {
            Column::Code => Cell::Text(Some(self.code.as_str())),
            Column::Name => Cell::Text(self.name.as_deref()),
            Column::Datetime => Cell::Time(self.datetime),
            Column::Confidence => Cell::Text(Some(self.confidence.as_str())),
            Column::DuringTradingHours => Cell::Flag(self.during_trading_hours),
            Column::CandidateDatetimes => Cell::Times(&self.candidates),
            Column::IrDatetime => Cell::Time(self.observations.ir),
            Column::Source(source) => Cell::Time(self.observations.scraper(source)),
            Column::InferredDatetime => Cell::Time(self.observations.inferred),
            Column::PastDatetimes => Cell::Times(&self.history),
        }
    }
}

/// Final table of one calendar run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calendar {
    pub columns: Vec<Column>,
    pub rows: Vec<CalendarRow>,
}

impl Calendar {
    pub fn new(columns: Vec<Column>, rows: Vec<CalendarRow>) -> Self {
        Self { columns, rows }
    }

    /// No rows, full default schema
    pub fn empty() -> Self {
        let sources = kabu_common::config::default_sources();
        Self::new(columns_for(true, &sources, true), Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn has_column(&self, column: &Column) -> bool {
        self.columns.contains(column)
    }

    pub fn row(&self, code: &str) -> Option<&CalendarRow> {
        self.rows.iter().find(|r| r.code.as_str() == code)
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|col| (col.name(), row.cell(col).to_json()))
                    .collect()
            })
            .collect()
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_records())?)
    }

    /// CSV without a BOM (file export adds one)
    pub fn write_csv<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(self.column_names())?;
        for row in &self.rows {
            writer.write_record(self.columns.iter().map(|col| row.cell(col).to_text()))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Aligned plain-text table
    pub fn to_text_table(&self) -> String {
        let header = self.column_names();
        let body: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| self.columns.iter().map(|col| row.cell(col).to_text()).collect())
            .collect();

        let mut widths: Vec<usize> = header.iter().map(|h| h.width()).collect();
        for cells in &body {
            for (width, cell) in widths.iter_mut().zip(cells) {
                *width = (*width).max(cell.width());
            }
        }

        let mut out = String::new();
        for line in std::iter::once(&header).chain(body.iter()) {
            let mut rendered = String::new();
            for (i, (cell, width)) in line.iter().zip(&widths).enumerate() {
                if i > 0 {
                    rendered.push_str("  ");
                }
                rendered.push_str(cell);
                rendered.extend(std::iter::repeat(' ').take(width - cell.width()));
            }
            let _ = writeln!(out, "{}", rendered.trim_end());
        }
        out
    }

    /// Write to `path`, choosing the format from its extension
    pub async fn export(&self, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => {
                let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
                file.write_all(UTF8_BOM)?;
                self.write_csv(file)?;
            }
            "json" => std::fs::write(path, self.to_json_string()?)?,
            "db" | "sqlite" | "sqlite3" => return self.export_sqlite(path, DEFAULT_TABLE).await,
            "parquet" => {
                return Err(CalendarError::Export(
                    "Parquet export is not supported; use .csv, .json or .db".to_string(),
                ))
            }
            other => {
                return Err(CalendarError::Export(format!(
                    "Unsupported export extension '{}' for {}",
                    other,
                    path.display()
                )))
            }
        }
        info!(rows = self.rows.len(), path = %path.display(), "Exported calendar");
        Ok(())
    }

    /// Replace `table` in the SQLite database at `path` with this calendar
    pub async fn export_sqlite(&self, path: &Path, table: &str) -> Result<()> {
        let table = quoted_identifier(table)?;
        let pool = open_sqlite(path, true).await?;

        let definitions: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let sql_type = match col.kind() {
                    CellKind::Flag => "INTEGER",
                    _ => "TEXT",
                };
                format!("\"{}\" {}", col.name(), sql_type)
            })
            .collect();
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        let insert = format!("INSERT INTO {} VALUES ({})", table, placeholders);

        let mut tx = pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("CREATE TABLE {} ({})", table, definitions.join(", ")))
            .execute(&mut *tx)
            .await?;

        for row in &self.rows {
            let mut query = sqlx::query(&insert);
            for col in &self.columns {
                query = match row.cell(col) {
                    Cell::Flag(flag) => query.bind(i64::from(flag)),
                    Cell::Text(None) | Cell::Time(None) => query.bind(None::<String>),
                    cell => query.bind(Some(cell.to_text())),
                };
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        pool.close().await;

        info!(rows = self.rows.len(), path = %path.display(), table = %table, "Exported calendar to SQLite");
        Ok(())
    }
}

/// Read a previously exported table
///
/// With `date` (`YYYY-MM-DD`), only rows whose `datetime` starts with it are
/// returned.
pub async fn load_from_sqlite(path: &Path, table: &str, date: Option<&str>) -> Result<Calendar> {
    if !path.exists() {
        return Err(CalendarError::Export(format!(
            "Database not found: {}",
            path.display()
        )));
    }
    let table_sql = quoted_identifier(table)?;
    let pool = open_sqlite(path, false).await?;

    let schema = sqlx::query(&format!("PRAGMA table_info({})", table_sql))
        .fetch_all(&pool)
        .await?;
    if schema.is_empty() {
        pool.close().await;
        return Err(CalendarError::Export(format!(
            "Table '{}' not found in {}",
            table,
            path.display()
        )));
    }
    let columns: Vec<Column> = schema
        .iter()
        .map(|info| {
            let name: String = info.try_get("name")?;
            Column::from_name(&name)
                .ok_or_else(|| CalendarError::Export(format!("Unknown column '{}'", name)))
        })
        .collect::<Result<_>>()?;

    let records = match date {
        Some(date) => {
            sqlx::query(&format!("SELECT * FROM {} WHERE datetime LIKE ?", table_sql))
                .bind(format!("{}%", date))
                .fetch_all(&pool)
                .await?
        }
        None => {
            sqlx::query(&format!("SELECT * FROM {}", table_sql))
                .fetch_all(&pool)
                .await?
        }
    };
    pool.close().await;

    let mut rows = Vec::with_capacity(records.len());
    for record in &records {
        let mut row = CalendarRow {
            code: StockCode::new(""),
            name: None,
            datetime: None,
            confidence: Confidence::Low,
            during_trading_hours: false,
            candidates: Vec::new(),
            observations: Observations::default(),
            history: Vec::new(),
        };
        for (i, column) in columns.iter().enumerate() {
            if column.kind() == CellKind::Flag {
                row.during_trading_hours = record.try_get::<Option<i64>, _>(i)?.unwrap_or(0) != 0;
                continue;
            }
            let text: Option<String> = record.try_get(i)?;
            let text = text.unwrap_or_default();
            let times = || -> Vec<Timestamp> { text.split(';').filter_map(parse_timestamp).collect() };
            match column {
                Column::Code => row.code = StockCode::new(&text),
                Column::Name => row.name = Some(text.clone()).filter(|t| !t.is_empty()),
                Column::Datetime => row.datetime = parse_timestamp(&text),
                Column::Confidence => {
                    row.confidence = text.parse().map_err(CalendarError::Export)?;
                }
                Column::CandidateDatetimes => row.candidates = times(),
                Column::PastDatetimes => row.history = times(),
                Column::IrDatetime => row.observations.ir = parse_timestamp(&text),
                Column::InferredDatetime => row.observations.inferred = parse_timestamp(&text),
                Column::Source(source) => row.observations.scrapers.push(ScraperObservation {
                    source: source.clone(),
                    at: parse_timestamp(&text),
                }),
                Column::DuringTradingHours => {}
            }
        }
        rows.push(row);
    }

    info!(rows = rows.len(), path = %path.display(), table, "Loaded calendar from SQLite");
    Ok(Calendar::new(columns, rows))
}

async fn open_sqlite(path: &Path, create: bool) -> Result<sqlx::SqlitePool> {
    if create {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mode = if create { "rwc" } else { "ro" };
    let url = format!("sqlite://{}?mode={}", path.display(), mode);
    Ok(SqlitePoolOptions::new().max_connections(1).connect(&url).await?)
}

fn quoted_identifier(name: &str) -> Result<String> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(CalendarError::Export(format!("Invalid table name '{}'", name)));
    }
    Ok(format!("\"{}\"", name))
}
