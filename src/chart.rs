//! Chart series preparation.
//!
//! Rendering is left to an external tool; this module only selects rows and
//! shapes the points each chart kind needs, then writes them as JSON.

use crate::error::{CitevoError, Result};
use crate::table::{percent_column, AggregateTable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    /// Most recent period only
    Bar,
    /// Every period, sized by ratio to the most recent period
    Bubble,
    /// Every period
    Scatter,
}

impl FromStr for ChartKind {
    type Err = CitevoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bar" => Ok(ChartKind::Bar),
            "bubble" => Ok(ChartKind::Bubble),
            "scatter" => Ok(ChartKind::Scatter),
            other => Err(CitevoError::Config(format!("Unknown chart kind: {}", other))),
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartKind::Bar => "bar",
            ChartKind::Bubble => "bubble",
            ChartKind::Scatter => "scatter",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub identifier: String,
    pub period: String,
    pub citations: Option<f64>,
    /// Bubble size; ratio to the most recent period
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub kind: ChartKind,
    pub periods: Vec<String>,
    pub points: Vec<ChartPoint>,
}

impl ChartSeries {
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!(kind = %self.kind, points = self.points.len(), path = %path.display(), "Saved chart series");
        Ok(())
    }
}

/// Select the top `n` rows by the most recent period and build the series.
pub fn prepare_chart(kind: ChartKind, table: &AggregateTable, n: usize) -> Result<ChartSeries> {
    let periods = table.period_columns();
    let first = periods
        .first()
        .ok_or_else(|| CitevoError::Validation("Table has no period columns".to_string()))?;

    let mut top = table.top_n(n, first)?;

    let periods: Vec<String> = match kind {
        ChartKind::Bar => vec![first.clone()],
        ChartKind::Bubble | ChartKind::Scatter => periods.clone(),
    };

    if kind == ChartKind::Bubble && top.column_index(&percent_column(first)).is_none() {
        top = top.derive_percentage_change(&periods)?;
    }

    let mut points = Vec::new();
    for period in &periods {
        for id in top.identifiers() {
            let citations = top.get(id, period).and_then(|c| c.as_f64());
            let size = match kind {
                ChartKind::Bubble => top
                    .get(id, &percent_column(period))
                    .and_then(|c| c.as_f64()),
                _ => None,
            };
            points.push(ChartPoint {
                identifier: id.to_string(),
                period: period.clone(),
                citations,
                size,
            });
        }
    }

    Ok(ChartSeries {
        kind,
        periods,
        points,
    })
}
