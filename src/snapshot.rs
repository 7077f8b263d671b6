//! Raw-response snapshots.
//!
//! Every fetched page is kept per period so a run can be replayed without
//! touching the network.

use crate::error::{CitevoError, Result};
use crate::inspire::PageResult;
use crate::period::Period;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default snapshot path: `<cache dir>/citevo/snapshot.json`
pub fn default_snapshot_path() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|p| p.join("citevo").join("snapshot.json"))
        .ok_or_else(|| CitevoError::Config("Cannot determine cache directory".to_string()))
}

/// `explicit` if given, else [`default_snapshot_path`]. Both saving after a
/// run and loading for a replay resolve through here.
pub fn resolve_snapshot_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => default_snapshot_path(),
    }
}

/// Pages fetched for one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSnapshot {
    pub period: Period,
    pub pages: Vec<PageResult>,
}

/// Periods in processing order (most recent first)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub created: DateTime<Utc>,
    pub periods: Vec<PeriodSnapshot>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            created: Utc::now(),
            periods: Vec::new(),
        }
    }
}

impl Snapshot {
    pub fn push(&mut self, period: Period, pages: Vec<PageResult>) {
        self.periods.push(PeriodSnapshot { period, pages });
    }

    pub fn record_count(&self) -> usize {
        self.periods
            .iter()
            .flat_map(|p| &p.pages)
            .map(|page| page.hits.len())
            .sum()
    }

    /// Save to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        info!(
            periods = self.periods.len(),
            records = self.record_count(),
            path = %path.display(),
            "Saved snapshot"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let snapshot: Snapshot = serde_json::from_reader(std::io::BufReader::new(file))?;
        info!(
            periods = snapshot.periods.len(),
            records = snapshot.record_count(),
            path = %path.display(),
            "Loaded snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::period_containing;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_resolve_snapshot_path() -> Result<()> {
        match default_snapshot_path() {
            Ok(default) => {
                assert!(default.ends_with("citevo/snapshot.json"));
                assert_eq!(resolve_snapshot_path(None)?, default);
            }
            // No cache dir on this host
            Err(_) => assert!(resolve_snapshot_path(None).is_err()),
        }

        let explicit = PathBuf::from("/tmp/run.json");
        assert_eq!(resolve_snapshot_path(Some(explicit.clone()))?, explicit);
        Ok(())
    }

    #[test]
    fn test_load_missing() {
        assert!(Snapshot::load(Path::new("/nonexistent/snapshot.json")).is_err());
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("snapshot.json");

        let period = period_containing(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap_or_default(), 2)?;
        let mut snapshot = Snapshot::default();
        snapshot.push(
            period,
            vec![PageResult {
                hits: vec![json!({"metadata": {"control_number": 1}})],
                total: 1,
            }],
        );
        snapshot.save(&path)?;

        let loaded = Snapshot::load(&path)?;
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.record_count(), 1);
        assert_eq!(loaded.periods[0].period.label(), "2024-03_2024-04");
        Ok(())
    }
}
