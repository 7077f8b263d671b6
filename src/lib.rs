//! # citevo
//!
//! Citation timeframe aggregation over the INSPIRE-HEP literature API.
//!
//! Splits a date range into fixed-width calendar periods, fetches the most
//! cited papers of each period, counts how often each referenced work is
//! cited, and merges the counts into one wide table with a column per period.
//!
//! ## Modules
//!
//! - [`period`] - Calendar period arithmetic
//! - [`inspire`] - INSPIRE-HEP client and concurrent page fetching
//! - [`flatten`] - Field selection and record flattening
//! - [`aggregate`] - Reference counting
//! - [`table`] - Multi-period table, merge and percentage change
//! - [`pipeline`] - Per-period and series orchestration
//! - [`snapshot`] - Raw-response persistence for replays
//! - [`details`] - Title and date lookup for top rows
//! - [`chart`] - Chart series preparation
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use citevo::inspire::{ClientConfig, InspireClient};
//! use citevo::period::parse_date;
//! use citevo::pipeline::{Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = InspireClient::new(ClientConfig::default())?;
//!     let pipeline = Pipeline::new(client, PipelineConfig::with_default_fields()?)?;
//!     let series = pipeline
//!         .process_timeframe_series(parse_date("2024-08-01")?, parse_date("2024-01-01")?)
//!         .await?;
//!     println!("{} identifiers over {} periods", series.table.len(), series.periods.len());
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod chart;
pub mod details;
pub mod error;
pub mod export;
pub mod flatten;
pub mod inspire;
pub mod period;
pub mod pipeline;
pub mod snapshot;
pub mod table;
pub mod value;

pub use error::{CitevoError, Result};
