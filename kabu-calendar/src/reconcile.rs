//! Reconciliation engine
//!
//! Turns the per-source observations of one row into a confidence label, an
//! ordered list of distinct candidate datetimes and the selected datetime.
//!
//! # Confidence
//! - **highest**: the company's IR page gave a datetime
//! - **high**: the history-inferred time of day matches a calendar source,
//!   or at least two calendar sources agree on the time of day
//! - **medium**: two or more calendar sources, none agreeing
//! - **low**: one calendar source or none, and no inferred match
//!
//! Agreement compares hour and minute only. Candidate de-duplication
//! compares exact instants.
//!
//! Pure in-memory computation: no I/O, never fails.

use crate::types::{time_of_day, Confidence, Observations, Reconciliation, Timestamp};

/// Confidence label for a set of observations
///
/// `scrapers` holds the present calendar-source values in canonical order.
pub fn compute_confidence(
    ir: Option<Timestamp>,
    inferred: Option<Timestamp>,
    scrapers: &[Timestamp],
) -> Confidence {
    assess(ir, inferred, scrapers).0
}

/// Reconcile one row's observations
pub fn reconcile(observations: &Observations) -> Reconciliation {
    let ir = observations.ir;
    let inferred = observations.inferred;
    let scrapers = observations.scraper_values();

    if ir.is_none() && inferred.is_none() && scrapers.is_empty() {
        return Reconciliation::unknown();
    }

    let (confidence, basis) = assess(ir, inferred, &scrapers);
    let mut candidates = Candidates::default();

    match basis {
        Basis::Ir(ir_value) => {
            candidates.push(ir_value);
            candidates.extend(observations.present());
        }
        Basis::InferredMatch(inferred_value) => {
            candidates.push(inferred_value);
            candidates.extend(scrapers.iter().copied());
        }
        Basis::ScraperAgreement => {
            candidates.extend(largest_time_group(&scrapers));
            candidates.extend(observations.present());
        }
        Basis::Fallback => {
            candidates.extend(inferred);
            candidates.extend(scrapers.iter().copied());
        }
    }

    let candidates = candidates.into_vec();
    Reconciliation {
        selected: candidates.first().copied(),
        candidates,
        confidence,
    }
}

/// Why a row got its confidence; decides how candidates are ordered
enum Basis {
    Ir(Timestamp),
    InferredMatch(Timestamp),
    ScraperAgreement,
    Fallback,
}

fn assess(
    ir: Option<Timestamp>,
    inferred: Option<Timestamp>,
    scrapers: &[Timestamp],
) -> (Confidence, Basis) {
    if let Some(ir_value) = ir {
        return (Confidence::Highest, Basis::Ir(ir_value));
    }

    if let Some(inferred_value) = inferred {
        let target = time_of_day(&inferred_value);
        if scrapers.iter().any(|s| time_of_day(s) == target) {
            return (Confidence::High, Basis::InferredMatch(inferred_value));
        }
    }

    if scrapers.len() >= 2 {
        let mut seen = Vec::with_capacity(scrapers.len());
        for s in scrapers {
            let tod = time_of_day(s);
            if seen.contains(&tod) {
                return (Confidence::High, Basis::ScraperAgreement);
            }
            seen.push(tod);
        }
        return (Confidence::Medium, Basis::Fallback);
    }

    (Confidence::Low, Basis::Fallback)
}

/// Values of the largest time-of-day group, canonical order
///
/// On a size tie the group whose time of day appears first wins.
fn largest_time_group(scrapers: &[Timestamp]) -> Vec<Timestamp> {
    let mut groups: Vec<((u32, u32), Vec<Timestamp>)> = Vec::new();
    for s in scrapers {
        let tod = time_of_day(s);
        match groups.iter_mut().find(|(key, _)| *key == tod) {
            Some((_, members)) => members.push(*s),
            None => groups.push((tod, vec![*s])),
        }
    }

    let mut best: Option<Vec<Timestamp>> = None;
    for (_, members) in groups {
        if best.as_ref().map_or(true, |b| members.len() > b.len()) {
            best = Some(members);
        }
    }
    best.unwrap_or_default()
}

/// Ordered list that keeps only the first occurrence of each instant
#[derive(Default)]
struct Candidates(Vec<Timestamp>);

impl Candidates {
    fn push(&mut self, value: Timestamp) {
        if !self.0.contains(&value) {
            self.0.push(value);
        }
    }

    fn extend(&mut self, values: impl IntoIterator<Item = Timestamp>) {
        for v in values {
            self.push(v);
        }
    }

    fn into_vec(self) -> Vec<Timestamp> {
        self.0
    }
}
