//! Merge stage: full outer join of source tables on stock code
//!
//! Tables are merged in the order given (the run's canonical source order),
//! never in the order results arrived. Each merged row carries exactly one
//! slot per source, absent where the source did not list the code.

use crate::error::{CalendarError, Result};
use crate::types::{EntityRow, ScraperObservation, SourceTable, StockCode};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Merged rows plus the source order they were built with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedTable {
    pub sources: Vec<String>,
    /// Sorted by code
    pub rows: Vec<EntityRow>,
}

/// Outer-join source tables on code
///
/// - Name: first non-blank value in merge order
/// - Duplicate codes inside one table: first occurrence wins
/// - Zero tables is a caller error ([`CalendarError::NoSources`])
pub fn merge_sources(tables: &[SourceTable]) -> Result<MergedTable> {
    if tables.is_empty() {
        return Err(CalendarError::NoSources);
    }

    let sources: Vec<String> = tables.iter().map(|t| t.source.clone()).collect();
    let mut rows: BTreeMap<StockCode, EntityRow> = BTreeMap::new();

    for (slot, table) in tables.iter().enumerate() {
        let mut seen: HashSet<&StockCode> = HashSet::with_capacity(table.rows.len());
        for source_row in &table.rows {
            if !seen.insert(&source_row.code) {
                debug!(
                    source = %table.source,
                    code = %source_row.code,
                    "Duplicate code in source table, keeping first"
                );
                continue;
            }

            let row = rows.entry(source_row.code.clone()).or_insert_with(|| {
                let mut row = EntityRow::new(source_row.code.clone());
                row.observations.scrapers = sources
                    .iter()
                    .map(|s| ScraperObservation {
                        source: s.clone(),
                        at: None,
                    })
                    .collect();
                row
            });

            if row.name.is_none() {
                row.name = source_row
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string);
            }
            row.observations.scrapers[slot].at = source_row.datetime;
        }
    }

    debug!(sources = sources.len(), rows = rows.len(), "Merged source tables");
    Ok(MergedTable {
        sources,
        rows: rows.into_values().collect(),
    })
}
