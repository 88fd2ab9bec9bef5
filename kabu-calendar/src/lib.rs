//! kabu-calendar library interface
//!
//! Aggregates Japanese earnings announcement datetimes from broker calendars,
//! past announcement patterns and company IR pages, then reconciles them into
//! one datetime per stock code with a confidence label.

pub mod calendar;
pub mod context;
pub mod error;
pub mod fetch;
pub(crate) mod html;
pub mod history;
pub mod ir;
pub mod merge;
pub mod output;
pub mod parallel;
pub mod reconcile;
pub mod sources;
pub mod trading_hours;
pub mod types;

pub use crate::calendar::{Aggregator, CalendarOptions, LookupReport};
pub use crate::context::AppContext;
pub use crate::error::{CalendarError, Result, SourceError};
pub use crate::output::{load_from_sqlite, Calendar, CalendarRow, Column};
pub use crate::parallel::ParallelRunner;
pub use crate::reconcile::{compute_confidence, reconcile};
pub use crate::trading_hours::is_during_trading_hours;
pub use crate::types::{Confidence, Observations, Reconciliation, StockCode, Timestamp};
