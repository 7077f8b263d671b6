//! Record flattening.
//!
//! Converts one nested API record into a flat field -> value mapping using
//! dot-path field specifications such as `titles.title` or
//! `references.reference.dois`.
//!
//! Path walking rules:
//! - on a map, the segment is looked up directly (nulls count as absent)
//! - on a list, the lookup is mapped over every element and elements where
//!   the segment is absent are dropped, producing a list
//! - the first absent step short-circuits the whole path to
//!   [`FieldValue::Absent`]
//!
//! The reserved references field collects a deduplicated identifier set
//! across every entry of the record's `references` list instead of the
//! nested per-reference lists.

use crate::error::{CitevoError, OptionExt, Result};
use crate::value::Value;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Field spec that yields one identifier set per paper
pub const REFERENCES_DOIS_FIELD: &str = "references.reference.dois";

/// Raw record as returned by the metadata API (one search hit)
pub type RawRecord = serde_json::Value;

/// Parsed dot-separated path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(spec: &str) -> Result<Self> {
        let segments: Vec<String> = spec.trim().split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(CitevoError::Config(format!("Invalid field path '{}'", spec)));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Evaluate the path against `root`, `None` if any step is absent
    pub fn resolve(&self, root: &Value) -> Option<Value> {
        let mut node = Step::Ref(root);
        for segment in &self.segments {
            node = lookup(node, segment)?;
        }
        Some(node.into_value())
    }
}

/// Borrowed intermediate result of a path walk
enum Step<'a> {
    Ref(&'a Value),
    List(Vec<Step<'a>>),
}

impl Step<'_> {
    fn into_value(self) -> Value {
        match self {
            Step::Ref(v) => v.clone(),
            Step::List(items) => Value::List(items.into_iter().map(Step::into_value).collect()),
        }
    }
}

fn lookup<'a>(node: Step<'a>, segment: &str) -> Option<Step<'a>> {
    match node {
        Step::Ref(Value::List(items)) => Some(Step::List(
            items
                .iter()
                .filter_map(|item| lookup(Step::Ref(item), segment))
                .collect(),
        )),
        Step::Ref(v) => v.get(segment).map(Step::Ref),
        Step::List(items) => Some(Step::List(
            items
                .into_iter()
                .filter_map(|item| lookup(item, segment))
                .collect(),
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Direct,
    /// First segment names the reference list, the rest is walked per entry
    ReferenceSet,
}

/// One requested field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    name: String,
    path: FieldPath,
    kind: FieldKind,
}

impl FieldSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let name = spec.trim().to_string();
        let path = FieldPath::parse(&name)?;
        let kind = if name == REFERENCES_DOIS_FIELD {
            FieldKind::ReferenceSet
        } else {
            FieldKind::Direct
        };
        Ok(Self { name, path, kind })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, metadata: &Value) -> FieldValue {
        let Some(value) = self.path.resolve(metadata) else {
            return FieldValue::Absent;
        };

        match self.kind {
            FieldKind::ReferenceSet if !value.is_empty() => {
                FieldValue::Set(self.reference_identifiers(metadata))
            }
            _ => FieldValue::Value(value),
        }
    }

    fn reference_identifiers(&self, metadata: &Value) -> BTreeSet<String> {
        let Some((container, rest)) = self.path.segments().split_first() else {
            return BTreeSet::new();
        };
        let inner = FieldPath {
            segments: rest.to_vec(),
        };

        match metadata.get(container) {
            Some(Value::List(entries)) => entries
                .iter()
                .filter_map(|entry| inner.resolve(entry))
                .flat_map(|v| v.leaves())
                .collect(),
            _ => BTreeSet::new(),
        }
    }
}

/// Parse a comma-separated field list (e.g. `titles.title,citation_count`)
pub fn parse_field_specs(specs: &str) -> Result<Vec<FieldSpec>> {
    let fields: Vec<FieldSpec> = specs
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(FieldSpec::parse)
        .collect::<Result<_>>()?;

    if fields.is_empty() {
        return Err(CitevoError::Config("No fields requested".to_string()));
    }
    Ok(fields)
}

/// Comma-joined field names for the API `fields` parameter
pub fn api_fields(specs: &[FieldSpec]) -> String {
    specs.iter().map(FieldSpec::name).collect::<Vec<_>>().join(",")
}

/// Extracted value for one field of one record
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Absent,
    Value(Value),
    Set(BTreeSet<String>),
}

impl FieldValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    /// Identifiers contributed by this field, in order, duplicates kept
    pub fn identifiers(&self) -> Vec<String> {
        match self {
            FieldValue::Absent => Vec::new(),
            FieldValue::Value(v) => v.leaves(),
            FieldValue::Set(set) => set.iter().cloned().collect(),
        }
    }

    pub fn render(&self) -> String {
        match self {
            FieldValue::Absent => String::new(),
            FieldValue::Value(v) => v.render(),
            FieldValue::Set(set) => set.iter().cloned().collect::<Vec<_>>().join(";"),
        }
    }
}

/// Flat field -> value mapping, fields in request order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlatRecord {
    fields: Vec<(String, FieldValue)>,
}

impl FlatRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl FromIterator<(String, FieldValue)> for FlatRecord {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Flatten one raw hit. The hit must be an object with a `metadata` map.
pub fn flatten(record: &RawRecord, specs: &[FieldSpec]) -> Result<FlatRecord> {
    let metadata = record
        .get("metadata")
        .filter(|m| m.is_object())
        .ok_or_parse("Record has no metadata object")?;
    let metadata = Value::from(metadata);

    Ok(specs
        .iter()
        .map(|spec| (spec.name.clone(), spec.extract(&metadata)))
        .collect())
}

/// Flatten every record on `pool`, skipping malformed ones.
///
/// Output order is unspecified.
pub fn flatten_all(records: &[RawRecord], specs: &[FieldSpec], pool: &ThreadPool) -> Vec<FlatRecord> {
    let flat: Vec<FlatRecord> = pool.install(|| {
        records
            .par_iter()
            .filter_map(|record| match flatten(record, specs) {
                Ok(flat) => Some(flat),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed record");
                    None
                }
            })
            .collect()
    });

    debug!(input = records.len(), flattened = flat.len(), "Flattened records");
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Scalar;
    use serde_json::json;

    fn str_value(s: &str) -> Value {
        Value::Scalar(Scalar::Str(s.to_string()))
    }

    fn specs(list: &str) -> Vec<FieldSpec> {
        parse_field_specs(list).unwrap()
    }

    fn sample_record() -> RawRecord {
        json!({
            "id": "1",
            "metadata": {
                "titles": [{"title": "First"}, {"source": "arXiv"}, {"title": "Second"}],
                "citation_count": 42,
                "control_number": 1001,
                "references": [
                    {"reference": {"dois": ["10.1/a", "10.1/b"]}},
                    {"reference": {"dois": ["10.1/a"]}},
                    {"reference": {"arxiv_eprint": "2101.00001"}},
                    {"record": {"$ref": "https://inspirehep.net/api/literature/123"}}
                ]
            }
        })
    }

    #[test]
    fn test_direct_scalar() {
        let flat = flatten(&sample_record(), &specs("citation_count")).unwrap();
        assert_eq!(
            flat.get("citation_count"),
            Some(&FieldValue::Value(Value::Scalar(Scalar::Int(42))))
        );
    }

    #[test]
    fn test_list_expansion_drops_absent_elements() {
        let flat = flatten(&sample_record(), &specs("titles.title")).unwrap();
        assert_eq!(
            flat.get("titles.title"),
            Some(&FieldValue::Value(Value::List(vec![
                str_value("First"),
                str_value("Second"),
            ])))
        );
    }

    #[test]
    fn test_references_dois_become_deduplicated_set() {
        let flat = flatten(&sample_record(), &specs(REFERENCES_DOIS_FIELD)).unwrap();
        let expected: BTreeSet<String> = ["10.1/a", "10.1/b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(flat.get(REFERENCES_DOIS_FIELD), Some(&FieldValue::Set(expected)));
    }

    #[test]
    fn test_reference_records_follow_plain_path() {
        let flat = flatten(&sample_record(), &specs("references.record.$ref")).unwrap();
        assert_eq!(
            flat.get("references.record.$ref").unwrap().identifiers(),
            vec!["https://inspirehep.net/api/literature/123"]
        );
    }

    #[test]
    fn test_missing_path_is_absent() {
        let flat = flatten(
            &sample_record(),
            &specs("imprints.date,citation_count.value,titles.title.extra"),
        )
        .unwrap();
        assert!(flat.get("imprints.date").unwrap().is_absent());
        assert!(flat.get("citation_count.value").unwrap().is_absent());
        // A list whose elements lack the segment resolves to an empty list
        assert_eq!(
            flat.get("titles.title.extra"),
            Some(&FieldValue::Value(Value::List(vec![])))
        );
    }

    #[test]
    fn test_references_without_dois_keep_direct_value() {
        let record = json!({"metadata": {"references": [{"reference": {"title": "x"}}]}});
        let flat = flatten(&record, &specs(REFERENCES_DOIS_FIELD)).unwrap();
        assert_eq!(
            flat.get(REFERENCES_DOIS_FIELD),
            Some(&FieldValue::Value(Value::List(vec![])))
        );
        assert!(flat.get(REFERENCES_DOIS_FIELD).unwrap().identifiers().is_empty());
    }

    #[test]
    fn test_malformed_record_is_error() {
        assert!(flatten(&json!("not a record"), &specs("titles.title")).is_err());
        assert!(flatten(&json!({"metadata": [1, 2]}), &specs("titles.title")).is_err());
    }

    #[test]
    fn test_flatten_all_skips_malformed() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let records = vec![sample_record(), json!(42), sample_record()];
        let flat = flatten_all(&records, &specs("citation_count"), &pool);
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn test_field_spec_parsing() {
        assert!(parse_field_specs("a..b").is_err());
        assert!(parse_field_specs(" , ").is_err());
        let parsed = specs("titles.title, citation_count");
        assert_eq!(api_fields(&parsed), "titles.title,citation_count");
    }
}
