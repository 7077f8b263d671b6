//! The wide identifier x period table.
//!
//! One row per identifier, one column per processed period (most recent
//! first), plus optional derived ratio and detail columns. Rows are never
//! removed once introduced.

use crate::aggregate::ReferenceCountTable;
use crate::error::{CitevoError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

/// Header of the key column in exported tables
pub const KEY_COLUMN: &str = "identifier";

static PERIOD_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}_\d{4}-\d{2}$").expect("period label regex is valid")
});

/// Name of the derived ratio column for a period column
pub fn percent_column(period: &str) -> String {
    format!("{} (%)", period)
}

/// Period and ratio columns hold numbers; every other column is text
pub fn is_numeric_column(name: &str) -> bool {
    PERIOD_LABEL.is_match(name) || name.ends_with(" (%)")
}

/// One table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Count(u64),
    Ratio(f64),
    Text(String),
    /// No value: identifier absent in the period, or an undefined ratio
    Missing,
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Count(n) => Some(*n as f64),
            Cell::Ratio(x) => Some(*x),
            Cell::Text(_) | Cell::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    /// CSV text. Ratios always carry a decimal point so they reload as ratios.
    pub fn render(&self) -> String {
        match self {
            Cell::Count(n) => n.to_string(),
            Cell::Ratio(x) if x.is_finite() => format!("{:?}", x),
            Cell::Ratio(_) | Cell::Missing => String::new(),
            Cell::Text(s) => s.clone(),
        }
    }

    /// Inverse of [`Cell::render`] for a numeric column
    pub fn parse(raw: &str) -> Cell {
        let raw = raw.trim();
        if raw.is_empty() {
            return Cell::Missing;
        }
        if let Ok(n) = raw.parse::<u64>() {
            return Cell::Count(n);
        }
        match raw.parse::<f64>() {
            Ok(x) if x.is_finite() => Cell::Ratio(x),
            Ok(_) => Cell::Missing,
            Err(_) => Cell::Text(raw.to_string()),
        }
    }

    /// Inverse of [`Cell::render`] for a text column; never numeric
    pub fn parse_text(raw: &str) -> Cell {
        if raw.is_empty() {
            Cell::Missing
        } else {
            Cell::Text(raw.to_string())
        }
    }
}

/// How incoming identifiers affect row membership during a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinStrategy {
    /// Accumulated rows only; identifiers first seen later are dropped
    #[default]
    Left,
    /// Identifiers first seen later are appended as new rows
    Outer,
}

impl FromStr for JoinStrategy {
    type Err = CitevoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(JoinStrategy::Left),
            "outer" => Ok(JoinStrategy::Outer),
            other => Err(CitevoError::Config(format!("Unknown join strategy: {}", other))),
        }
    }
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinStrategy::Left => f.write_str("left"),
            JoinStrategy::Outer => f.write_str("outer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    identifier: String,
    cells: Vec<Cell>,
}

impl Row {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateTable {
    key_column: String,
    columns: Vec<String>,
    rows: Vec<Row>,
    index: HashMap<String, usize>,
}

impl Default for AggregateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateTable {
    /// An unseeded table with no columns and no rows
    pub fn new() -> Self {
        Self {
            key_column: KEY_COLUMN.to_string(),
            columns: Vec::new(),
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Seed a table from one period's counts, highest count first
    pub fn from_counts(counts: &ReferenceCountTable, label: &str) -> Self {
        let mut table = Self::new();
        table.columns.push(label.to_string());
        for (id, count) in counts.sorted() {
            table.push_row(id.to_string(), vec![Cell::Count(count)]);
        }
        table
    }

    /// True while no period has contributed a row. Earlier columns may
    /// already exist.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.identifier.as_str())
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.index.contains_key(identifier)
    }

    pub fn get(&self, identifier: &str, column: &str) -> Option<&Cell> {
        let row = *self.index.get(identifier)?;
        let col = self.column_index(column)?;
        self.rows[row].cells.get(col)
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Columns whose header is a period label (`YYYY-MM_YYYY-MM`)
    pub fn period_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| PERIOD_LABEL.is_match(c))
            .cloned()
            .collect()
    }

    fn push_row(&mut self, identifier: String, cells: Vec<Cell>) {
        self.index.insert(identifier.clone(), self.rows.len());
        self.rows.push(Row { identifier, cells });
    }

    fn check_new_column(&self, name: &str) -> Result<()> {
        if name == self.key_column || self.columns.iter().any(|c| c == name) {
            return Err(CitevoError::Validation(format!("Duplicate column: {}", name)));
        }
        Ok(())
    }

    fn required_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| CitevoError::Validation(format!("Unknown column: {}", name)))
    }

    /// Fold one period's counts into the table under column `label`.
    ///
    /// A table without rows is seeded from `incoming`, with [`Cell::Missing`]
    /// under any earlier columns. Otherwise existing rows get the incoming
    /// count or [`Cell::Missing`]; identifiers only present in `incoming` are
    /// appended only under [`JoinStrategy::Outer`].
    pub fn merge(
        mut self,
        incoming: &ReferenceCountTable,
        label: &str,
        strategy: JoinStrategy,
    ) -> Result<Self> {
        self.check_new_column(label)?;
        let seeding = self.is_empty();
        self.columns.push(label.to_string());

        for row in &mut self.rows {
            let cell = incoming
                .get(&row.identifier)
                .map(Cell::Count)
                .unwrap_or(Cell::Missing);
            row.cells.push(cell);
        }

        if seeding || strategy == JoinStrategy::Outer {
            let width = self.columns.len();
            let new_rows: Vec<(String, u64)> = incoming
                .sorted()
                .into_iter()
                .filter(|(id, _)| !self.index.contains_key(*id))
                .map(|(id, count)| (id.to_string(), count))
                .collect();
            for (id, count) in new_rows {
                let mut cells = vec![Cell::Missing; width - 1];
                cells.push(Cell::Count(count));
                self.push_row(id, cells);
            }
        }

        debug!(column = label, rows = self.rows.len(), %strategy, "Merged period");
        Ok(self)
    }

    /// Append `<p> (%)` = `p / periods[0]` for every period column `p`.
    ///
    /// A missing value or zero baseline yields [`Cell::Missing`] for that cell.
    pub fn derive_percentage_change(mut self, periods: &[String]) -> Result<Self> {
        let Some(baseline) = periods.first() else {
            return Ok(self);
        };
        let base_idx = self.required_column(baseline)?;
        let indices: Vec<usize> = periods
            .iter()
            .map(|p| self.required_column(p))
            .collect::<Result<_>>()?;
        for p in periods {
            self.check_new_column(&percent_column(p))?;
        }

        for row in &mut self.rows {
            let base = row.cells[base_idx].as_f64().filter(|b| *b != 0.0);
            let ratios: Vec<Cell> = indices
                .iter()
                .map(|&i| match (row.cells[i].as_f64(), base) {
                    (Some(value), Some(base)) => Cell::Ratio(value / base),
                    _ => Cell::Missing,
                })
                .collect();
            row.cells.extend(ratios);
        }
        self.columns.extend(periods.iter().map(|p| percent_column(p)));
        Ok(self)
    }

    /// The `n` rows with the largest numeric value in `column`, descending.
    /// Rows without a numeric value sort last.
    pub fn top_n(&self, n: usize, column: &str) -> Result<Self> {
        let col = self.required_column(column)?;
        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        order.sort_by(|&a, &b| {
            let va = self.rows[a].cells[col].as_f64();
            let vb = self.rows[b].cells[col].as_f64();
            match (va, vb) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });

        let mut top = Self {
            key_column: self.key_column.clone(),
            columns: self.columns.clone(),
            rows: Vec::new(),
            index: HashMap::new(),
        };
        for i in order.into_iter().take(n) {
            let row = &self.rows[i];
            top.push_row(row.identifier.clone(), row.cells.clone());
        }
        Ok(top)
    }

    /// Insert a text column before column `position`; rows without a value
    /// in `values` get [`Cell::Missing`].
    pub fn insert_text_column(
        &mut self,
        position: usize,
        name: &str,
        values: &HashMap<String, String>,
    ) -> Result<()> {
        self.check_new_column(name)?;
        let position = position.min(self.columns.len());
        self.columns.insert(position, name.to_string());
        for row in &mut self.rows {
            let cell = values
                .get(&row.identifier)
                .map(|v| Cell::Text(v.clone()))
                .unwrap_or(Cell::Missing);
            row.cells.insert(position, cell);
        }
        Ok(())
    }

    /// Write as CSV: key column first, then every column in order
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);

        let mut header = vec![self.key_column.as_str()];
        header.extend(self.columns.iter().map(String::as_str));
        wtr.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![row.identifier.clone()];
            record.extend(row.cells.iter().map(Cell::render));
            wtr.write_record(&record)?;
        }

        wtr.flush()?;
        Ok(())
    }

    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(file)
    }

    /// Read a table previously written by [`AggregateTable::write_csv`]
    pub fn read_csv<R: io::Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();

        let mut fields = headers.iter();
        let key_column = fields
            .next()
            .ok_or_else(|| CitevoError::Validation("CSV has no header".to_string()))?
            .to_string();

        let mut table = Self::new();
        table.key_column = key_column;
        for name in fields {
            table.check_new_column(name)?;
            table.columns.push(name.to_string());
        }

        let numeric: Vec<bool> = table.columns.iter().map(|c| is_numeric_column(c)).collect();

        for record in rdr.records() {
            let record = record?;
            let mut values = record.iter();
            let identifier = values.next().unwrap_or_default().to_string();
            if table.contains(&identifier) {
                return Err(CitevoError::Validation(format!(
                    "Duplicate identifier: {}",
                    identifier
                )));
            }
            let mut cells: Vec<Cell> = values
                .zip(&numeric)
                .map(|(raw, &is_numeric)| {
                    if is_numeric {
                        Cell::parse(raw)
                    } else {
                        Cell::parse_text(raw)
                    }
                })
                .collect();
            cells.resize(table.columns.len(), Cell::Missing);
            table.push_row(identifier, cells);
        }

        Ok(table)
    }

    pub fn load_csv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::read_csv(file)
    }
}
