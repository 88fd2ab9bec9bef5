//! Merge row membership does not depend on merge order

use chrono::NaiveDate;
use kabu_calendar::merge::merge_sources;
use kabu_calendar::types::{SourceRow, SourceTable};
use kabu_calendar::{StockCode, Timestamp};
use std::collections::BTreeSet;

fn at(h: u32, m: u32) -> Timestamp {
    NaiveDate::from_ymd_opt(2026, 2, 10)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn table(source: &str, rows: &[(&str, Option<&str>, Option<Timestamp>)]) -> SourceTable {
    SourceTable::new(
        source,
        rows.iter()
            .map(|(code, name, datetime)| SourceRow {
                code: StockCode::new(code),
                name: name.map(str::to_string),
                datetime: *datetime,
            })
            .collect(),
    )
}

fn fixtures() -> Vec<SourceTable> {
    vec![
        table("sbi", &[("7203", Some("トヨタ自動車"), Some(at(13, 55))), ("6758", None, Some(at(15, 30)))]),
        table("matsui", &[("6758", Some("ソニーグループ"), Some(at(15, 30))), ("9984", Some("ソフトバンクグループ"), None)]),
        table("tradersweb", &[("130A", Some(" "), Some(at(15, 0))), ("7203", Some("トヨタ"), None)]),
    ]
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for rest in permutations(n - 1) {
        for pos in 0..=rest.len() {
            let mut p = rest.clone();
            p.insert(pos, n - 1);
            out.push(p);
        }
    }
    out
}

#[test]
fn test_code_set_is_order_independent() {
    let tables = fixtures();
    let expected: BTreeSet<String> = tables
        .iter()
        .flat_map(|t| t.rows.iter().map(|r| r.code.to_string()))
        .collect();

    let orders = permutations(tables.len());
    assert_eq!(orders.len(), 6);

    for order in orders {
        let ordered: Vec<SourceTable> = order.iter().map(|&i| tables[i].clone()).collect();
        let merged = merge_sources(&ordered).unwrap();

        let codes: BTreeSet<String> = merged.rows.iter().map(|r| r.code.to_string()).collect();
        assert_eq!(codes, expected, "order {:?}", order);

        let sources: Vec<&str> = order.iter().map(|&i| tables[i].source.as_str()).collect();
        assert_eq!(merged.sources, sources);
        for row in &merged.rows {
            assert_eq!(row.observations.scrapers.len(), tables.len());
        }
    }
}

#[test]
fn test_values_stay_with_their_source() {
    let tables = fixtures();
    let reversed: Vec<SourceTable> = tables.iter().rev().cloned().collect();

    for merged in [merge_sources(&tables).unwrap(), merge_sources(&reversed).unwrap()] {
        let toyota = merged.rows.iter().find(|r| r.code.as_str() == "7203").unwrap();
        assert_eq!(toyota.observations.scraper("sbi"), Some(at(13, 55)));
        assert_eq!(toyota.observations.scraper("tradersweb"), None);
        assert_eq!(toyota.observations.scraper("matsui"), None);

        let new_listing = merged.rows.iter().find(|r| r.code.as_str() == "130A").unwrap();
        assert_eq!(new_listing.name, None);
    }
}

#[test]
fn test_name_tie_break_follows_order() {
    let tables = fixtures();
    let forward = merge_sources(&tables).unwrap();
    let reversed: Vec<SourceTable> = tables.iter().rev().cloned().collect();
    let backward = merge_sources(&reversed).unwrap();

    let name = |m: &kabu_calendar::merge::MergedTable| {
        m.rows
            .iter()
            .find(|r| r.code.as_str() == "7203")
            .and_then(|r| r.name.clone())
    };
    assert_eq!(name(&forward).as_deref(), Some("トヨタ自動車"));
    assert_eq!(name(&backward).as_deref(), Some("トヨタ"));
}
