//! Reference counting for one period.

use crate::flatten::FlatRecord;
use std::collections::HashMap;

/// Identifier -> occurrence count for one period.
///
/// Identifiers that never occur are absent rather than zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceCountTable {
    counts: HashMap<String, u64>,
}

impl ReferenceCountTable {
    pub fn get(&self, identifier: &str) -> Option<u64> {
        self.counts.get(identifier).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Total number of references counted
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Entries by count descending, identifier ascending on ties
    pub fn sorted(&self) -> Vec<(&str, u64)> {
        let mut entries: Vec<(&str, u64)> = self
            .counts
            .iter()
            .map(|(id, count)| (id.as_str(), *count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries
    }
}

impl FromIterator<(String, u64)> for ReferenceCountTable {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut counts = HashMap::new();
        for (id, count) in iter {
            *counts.entry(id).or_insert(0) += count;
        }
        Self { counts }
    }
}

/// Count every identifier found in `field` across `records`.
///
/// Each paper contributes the identifiers of its field value as given:
/// reference sets are already distinct per paper, plain lists are counted
/// element by element.
pub fn aggregate(records: &[FlatRecord], field: &str) -> ReferenceCountTable {
    records
        .iter()
        .filter_map(|record| record.get(field))
        .flat_map(|value| value.identifiers())
        .map(|id| (id, 1))
        .collect()
}
