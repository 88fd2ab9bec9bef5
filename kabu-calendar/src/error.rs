//! Error types for kabu-calendar
//!
//! Two layers:
//! - [`CalendarError`] for failures a caller has to handle (bad input,
//!   export and IO problems)
//! - [`SourceError`] for a single source or provider failing. These are
//!   logged where they happen and turned into "absent" values, so they
//!   never abort a calendar run.

use thiserror::Error;

/// Result type for calendar operations
pub type Result<T> = std::result::Result<T, CalendarError>;

#[derive(Debug, Error)]
pub enum CalendarError {
    /// Target date is not a valid `YYYY-MM-DD` date
    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    /// Merge was called without any source table
    #[error("No source tables to merge")]
    NoSources,

    /// Unsupported export target or malformed export data
    #[error("Export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// kabu-common error
    #[error("Common error: {0}")]
    Common(#[from] kabu_common::Error),
}

/// Failure of one source, history lookup or IR lookup
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Connection or transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Response did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Request exceeded its timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Source cannot serve this request (unknown code, disabled, ...)
    #[error("Not available: {0}")]
    NotAvailable(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::HttpStatus {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            SourceError::Network(e.to_string())
        }
    }
}
