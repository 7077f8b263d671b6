//! CSV exports of flattened papers.

use crate::error::Result;
use crate::flatten::{FieldSpec, FlatRecord};
use crate::period::Period;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// File name of the per-period paper export, e.g. `top200_2024-07_2024-08.csv`
pub fn period_csv_name(period: &Period) -> String {
    format!("top200_{}.csv", period.label())
}

/// Write one row per paper with every requested field except `exclude`.
/// List values are `;`-joined.
pub fn write_papers_csv<W: io::Write>(
    writer: W,
    records: &[FlatRecord],
    specs: &[FieldSpec],
    exclude: &str,
) -> Result<()> {
    let columns: Vec<&str> = specs
        .iter()
        .map(FieldSpec::name)
        .filter(|name| *name != exclude)
        .collect();

    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_writer(writer);
    wtr.write_record(&columns)?;

    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|c| record.get(c).map(|v| v.render()).unwrap_or_default())
            .collect();
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Export one period's papers into `dir`. Nothing is written for an empty
/// period.
pub fn save_period_csv(
    dir: &Path,
    period: &Period,
    records: &[FlatRecord],
    specs: &[FieldSpec],
    exclude: &str,
) -> Result<Option<PathBuf>> {
    if records.is_empty() {
        info!(period = %period.label(), "No papers to save");
        return Ok(None);
    }

    std::fs::create_dir_all(dir)?;
    let path = dir.join(period_csv_name(period));
    let file = std::fs::File::create(&path)?;
    write_papers_csv(file, records, specs, exclude)?;

    info!(path = %path.display(), papers = records.len(), "Saved period CSV");
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::{flatten, parse_field_specs, REFERENCES_DOIS_FIELD};
    use crate::period::period_containing;
    use chrono::NaiveDate;
    use serde_json::json;

    fn records_and_specs() -> (Vec<FlatRecord>, Vec<FieldSpec>) {
        let specs =
            parse_field_specs(&format!("titles.title,citation_count,{}", REFERENCES_DOIS_FIELD))
                .unwrap();
        let record = json!({
            "metadata": {
                "titles": [{"title": "Dark, matter"}],
                "citation_count": 12,
                "references": [{"reference": {"dois": ["10.1/a"]}}]
            }
        });
        (vec![flatten(&record, &specs).unwrap()], specs)
    }

    #[test]
    fn test_write_papers_csv_drops_references() {
        let (records, specs) = records_and_specs();
        let mut buf = Vec::new();
        write_papers_csv(&mut buf, &records, &specs, REFERENCES_DOIS_FIELD).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "titles.title,citation_count\n\"Dark, matter\",12\n");
    }

    #[test]
    fn test_save_period_csv() -> Result<()> {
        let (records, specs) = records_and_specs();
        let dir = tempfile::tempdir()?;
        let period = period_containing(NaiveDate::from_ymd_opt(2024, 8, 1).unwrap_or_default(), 2)?;

        let path = save_period_csv(dir.path(), &period, &records, &specs, REFERENCES_DOIS_FIELD)?;
        let path = path.unwrap_or_default();
        assert!(path.ends_with("top200_2024-07_2024-08.csv"));
        assert!(path.exists());

        assert!(save_period_csv(dir.path(), &period, &[], &specs, REFERENCES_DOIS_FIELD)?.is_none());
        Ok(())
    }
}
