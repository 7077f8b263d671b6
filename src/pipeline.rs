//! Timeframe aggregation pipeline.
//!
//! For each period, most recent first: fetch pages concurrently, flatten the
//! hits on a bounded worker pool, count references, and fold the counts into
//! the running [`AggregateTable`]. Periods are processed strictly one after
//! another; parallelism only happens inside a period.

use crate::aggregate::{aggregate, ReferenceCountTable};
use crate::error::{CitevoError, Result};
use crate::export::save_period_csv;
use crate::flatten::{
    api_fields, flatten_all, parse_field_specs, FieldSpec, FlatRecord, REFERENCES_DOIS_FIELD,
};
use crate::inspire::{
    build_period_query, fetch_all_pages, parse_page, IdentifierRange, MetadataSource, PageResult,
    RequestConfig, DEFAULT_MAX_CONCURRENT, DEFAULT_PAGE_SIZE, DEFAULT_SORT,
};
use crate::period::{enumerate_periods, validate_step, Period};
use crate::snapshot::Snapshot;
use crate::table::{AggregateTable, JoinStrategy};
use chrono::NaiveDate;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Fields requested when none are configured
pub const DEFAULT_FIELDS: &str =
    "titles.title,control_number,citation_count,dois.value,imprints.date,references.reference.dois";

/// Pipeline settings, fixed for the lifetime of a [`Pipeline`]
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fields: Vec<FieldSpec>,
    /// Field whose identifiers are counted
    pub reference_field: String,
    pub step_months: u32,
    /// Pages fetched per period
    pub page_count: u32,
    pub page_size: usize,
    pub sort: Option<String>,
    pub id_range: Option<IdentifierRange>,
    /// Size of the flattening thread pool
    pub flatten_workers: usize,
    /// Page fetches in flight at once
    pub max_concurrent: usize,
    pub join: JoinStrategy,
    /// Per-period paper CSVs are written here when set
    pub export_dir: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            reference_field: REFERENCES_DOIS_FIELD.to_string(),
            step_months: 2,
            page_count: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: Some(DEFAULT_SORT.to_string()),
            id_range: None,
            flatten_workers: std::thread::available_parallelism().map_or(4, |n| n.get()),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            join: JoinStrategy::Left,
            export_dir: None,
        }
    }

    /// Defaults with [`DEFAULT_FIELDS`]
    pub fn with_default_fields() -> Result<Self> {
        Ok(Self::new(parse_field_specs(DEFAULT_FIELDS)?))
    }

    pub fn validate(&self) -> Result<()> {
        validate_step(self.step_months)?;
        if self.fields.is_empty() {
            return Err(CitevoError::Config("No fields requested".to_string()));
        }
        if !self.fields.iter().any(|f| f.name() == self.reference_field) {
            return Err(CitevoError::Config(format!(
                "Reference field '{}' is not among the requested fields",
                self.reference_field
            )));
        }
        if self.page_count == 0 || self.page_size == 0 {
            return Err(CitevoError::Config(
                "Page count and page size must be positive".to_string(),
            ));
        }
        if self.flatten_workers == 0 || self.max_concurrent == 0 {
            return Err(CitevoError::Config(
                "Worker counts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Output of one period
#[derive(Debug, Clone)]
pub struct TimeframeResult {
    pub period: Period,
    pub records: Vec<FlatRecord>,
    pub counts: ReferenceCountTable,
    /// Pages whose fetch failed and contributed no records
    pub failed_pages: Vec<u32>,
    /// Raw pages, kept for snapshots
    pub pages: Vec<PageResult>,
}

/// Output of a full series
#[derive(Debug, Clone)]
pub struct SeriesResult {
    pub table: AggregateTable,
    /// Periods in processing (column) order
    pub periods: Vec<Period>,
    pub failed_pages: usize,
    pub snapshot: Snapshot,
}

impl SeriesResult {
    /// Period column labels in table order
    pub fn period_labels(&self) -> Vec<String> {
        self.periods.iter().map(Period::label).collect()
    }
}

/// The CPU-bound half of the pipeline, shared with blocking tasks
struct Stages {
    config: PipelineConfig,
    pool: ThreadPool,
}

impl Stages {
    fn process_pages(&self, period: Period, pages: Vec<PageResult>) -> Result<TimeframeResult> {
        let records: Vec<FlatRecord> = pages
            .iter()
            .flat_map(|page| flatten_all(&page.hits, &self.config.fields, &self.pool))
            .collect();
        let counts = aggregate(&records, &self.config.reference_field);

        if let Some(dir) = &self.config.export_dir {
            save_period_csv(
                dir,
                &period,
                &records,
                &self.config.fields,
                &self.config.reference_field,
            )?;
        }

        info!(
            period = %period.label(),
            papers = records.len(),
            identifiers = counts.len(),
            references = counts.total(),
            "Counted references"
        );

        Ok(TimeframeResult {
            period,
            records,
            counts,
            failed_pages: Vec::new(),
            pages,
        })
    }
}

pub struct Pipeline<S> {
    source: S,
    stages: Arc<Stages>,
}

impl<S: MetadataSource> Pipeline<S> {
    /// Validate `config` and build the flattening pool
    pub fn new(source: S, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.flatten_workers)
            .thread_name(|i| format!("citevo-flatten-{}", i))
            .build()
            .map_err(|e| CitevoError::Config(format!("Failed to build worker pool: {}", e)))?;

        Ok(Self {
            source,
            stages: Arc::new(Stages { config, pool }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.stages.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Search request for one period
    pub fn request_for(&self, period: &Period) -> RequestConfig {
        let config = self.config();
        RequestConfig {
            query: build_period_query(period, config.id_range),
            sort: config.sort.clone(),
            page_size: config.page_size,
            fields: api_fields(&config.fields),
        }
    }

    /// Fetch, flatten and count one period. Failed pages are recorded and
    /// skipped. Flattening runs on a blocking thread, off the runtime.
    pub async fn process_single_timeframe(&self, period: Period) -> Result<TimeframeResult> {
        let request = self.request_for(&period);
        info!(period = %period.label(), query = %request.query, "Processing period");

        let fetches = fetch_all_pages(
            &self.source,
            &request,
            self.config().page_count,
            self.config().max_concurrent,
        )
        .await;

        let mut pages = Vec::with_capacity(fetches.len());
        let mut failed_pages = Vec::new();
        for fetch in fetches {
            match fetch.outcome {
                Ok(page) => pages.push(page),
                Err(_) => failed_pages.push(fetch.page),
            }
        }

        if !failed_pages.is_empty() {
            warn!(
                period = %period.label(),
                failed = ?failed_pages,
                "Continuing with partial results"
            );
        }

        let stages = Arc::clone(&self.stages);
        let mut result =
            tokio::task::spawn_blocking(move || stages.process_pages(period, pages)).await??;
        result.failed_pages = failed_pages;
        Ok(result)
    }

    /// Flatten and count already-fetched pages for `period`
    pub fn process_pages(&self, period: Period, pages: Vec<PageResult>) -> Result<TimeframeResult> {
        self.stages.process_pages(period, pages)
    }

    /// Like [`Pipeline::process_pages`] for raw response bodies. Bodies that
    /// do not parse as a search page are skipped.
    pub fn process_raw_pages(
        &self,
        period: Period,
        bodies: &[serde_json::Value],
    ) -> Result<TimeframeResult> {
        let pages = bodies
            .iter()
            .enumerate()
            .filter_map(|(i, body)| match parse_page(body) {
                Ok(page) => Some(page),
                Err(e) => {
                    warn!(period = %period.label(), index = i, error = %e, "Skipping page body");
                    None
                }
            })
            .collect();
        self.process_pages(period, pages)
    }

    /// Process every period from `latest` back to `earliest` and merge the
    /// counts into one table, most recent period first.
    pub async fn process_timeframe_series(
        &self,
        latest: NaiveDate,
        earliest: NaiveDate,
    ) -> Result<SeriesResult> {
        let periods = enumerate_periods(latest, earliest, self.config().step_months)?;

        let mut series = SeriesBuilder::new(self.config().join);
        for period in periods {
            let result = self.process_single_timeframe(period).await?;
            series.fold(result)?;
        }

        Ok(series.finish())
    }

    /// Rebuild the series from a snapshot without fetching anything
    pub fn replay_snapshot(&self, snapshot: &Snapshot) -> Result<SeriesResult> {
        let mut series = SeriesBuilder::new(self.config().join);
        for entry in &snapshot.periods {
            let result = self.process_pages(entry.period, entry.pages.clone())?;
            series.fold(result)?;
        }
        Ok(series.finish())
    }
}

/// Sequential merge point shared by live runs and replays
struct SeriesBuilder {
    join: JoinStrategy,
    table: AggregateTable,
    periods: Vec<Period>,
    failed_pages: usize,
    snapshot: Snapshot,
}

impl SeriesBuilder {
    fn new(join: JoinStrategy) -> Self {
        Self {
            join,
            table: AggregateTable::new(),
            periods: Vec::new(),
            failed_pages: 0,
            snapshot: Snapshot::default(),
        }
    }

    fn fold(&mut self, result: TimeframeResult) -> Result<()> {
        let table = std::mem::take(&mut self.table);
        self.table = table.merge(&result.counts, &result.period.label(), self.join)?;
        self.periods.push(result.period);
        self.failed_pages += result.failed_pages.len();
        self.snapshot.push(result.period, result.pages);
        Ok(())
    }

    fn finish(self) -> SeriesResult {
        info!(
            periods = self.periods.len(),
            identifiers = self.table.len(),
            failed_pages = self.failed_pages,
            "Series complete"
        );
        SeriesResult {
            table: self.table,
            periods: self.periods,
            failed_pages: self.failed_pages,
            snapshot: self.snapshot,
        }
    }
}
