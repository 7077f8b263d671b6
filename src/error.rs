//! Errors for citevo.
//!
//! Transport and file failures convert in through `#[from]`. Bad user input
//! (dates, step widths, ranges, field lists) is reported as `Config` before
//! any request is made; `Validation` covers table-shape problems such as
//! duplicate or unknown columns.

use chrono::NaiveDate;
use thiserror::Error;

/// Every failure the library reports
#[derive(Debug, Error)]
pub enum CitevoError {
    /// Request to INSPIRE could not be sent or its body not read
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Malformed API payload or unparsable value
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limited by the metadata API
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// Metadata API returned a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: i32,
        /// Human-readable detail
        message: String,
    },

    /// Snapshot, CSV or chart file could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot or chart JSON could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed CSV on export or reload
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error (bad step width, bad date, bad range)
    #[error("Config error: {0}")]
    Config(String),

    /// Table shape violated (duplicate or unknown column, duplicate row)
    #[error("Validation error: {0}")]
    Validation(String),

    /// No period of the calendar year contains the date
    #[error("No period found for {0}")]
    NoPeriod(NaiveDate),

    /// Off-runtime flattening task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Crate-wide result
pub type Result<T> = std::result::Result<T, CitevoError>;

/// Turns a missing payload field into a [`CitevoError::Parse`]
pub trait OptionExt<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| CitevoError::Parse(msg.to_string()))
    }
}
