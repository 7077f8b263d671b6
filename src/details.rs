//! Paper-detail enrichment for the aggregate table.
//!
//! Looks up title and preprint date for the leading rows and inserts them
//! as text columns right after the identifier.

use crate::error::Result;
use crate::flatten::{flatten, parse_field_specs, FieldSpec, RawRecord};
use crate::inspire::{MetadataSource, RequestConfig};
use crate::table::AggregateTable;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use url::Url;

/// Fields requested for each looked-up paper
pub const DETAIL_FIELDS: &str = "titles.title,preprint_date";

/// How a table identifier can be looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailKey {
    Recid(String),
    Doi(String),
}

/// Record id from a reference URL such as
/// `https://inspirehep.net/api/literature/1234`, or a bare numeric id
pub fn recid_from_reference(reference: &str) -> Option<String> {
    let reference = reference.trim();
    let is_numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    if is_numeric(reference) {
        return Some(reference.to_string());
    }

    let url = Url::parse(reference).ok()?;
    let last = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    is_numeric(last).then(|| last.to_string())
}

pub fn detail_key(identifier: &str) -> Option<DetailKey> {
    if let Some(recid) = recid_from_reference(identifier) {
        return Some(DetailKey::Recid(recid));
    }
    identifier
        .starts_with("10.")
        .then(|| DetailKey::Doi(identifier.to_string()))
}

async fn lookup<S: MetadataSource>(source: &S, key: &DetailKey) -> Result<Option<RawRecord>> {
    match key {
        DetailKey::Recid(recid) => source.fetch_record(recid, DETAIL_FIELDS).await.map(Some),
        DetailKey::Doi(doi) => {
            let mut request = RequestConfig::new(format!("dois.value:\"{}\"", doi), DETAIL_FIELDS);
            request.sort = None;
            request.page_size = 1;
            let page = source.fetch_page(&request, 1).await?;
            Ok(page.hits.into_iter().next())
        }
    }
}

fn first_value(record: &RawRecord, spec: &FieldSpec) -> Option<String> {
    let flat = flatten(record, std::slice::from_ref(spec)).ok()?;
    flat.get(spec.name())?.identifiers().into_iter().next()
}

/// Fetch details for the first `limit` rows and insert `title` and
/// `preprint_date` columns. Failed or impossible lookups leave cells missing.
pub async fn attach_details<S: MetadataSource>(
    mut table: AggregateTable,
    source: &S,
    limit: usize,
    concurrency: usize,
) -> Result<AggregateTable> {
    let specs = parse_field_specs(DETAIL_FIELDS)?;
    let keys: Vec<(String, DetailKey)> = table
        .identifiers()
        .take(limit)
        .filter_map(|id| detail_key(id).map(|key| (id.to_string(), key)))
        .collect();

    info!(requested = limit.min(table.len()), resolvable = keys.len(), "Looking up paper details");

    let results: Vec<(String, Option<RawRecord>)> = stream::iter(keys)
        .map(|(id, key)| async move {
            match lookup(source, &key).await {
                Ok(record) => (id, record),
                Err(e) => {
                    warn!(identifier = %id, error = %e, "Detail lookup failed");
                    (id, None)
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut columns: Vec<HashMap<String, String>> = vec![HashMap::new(); specs.len()];
    for (id, record) in results {
        let Some(record) = record else { continue };
        for (spec, column) in specs.iter().zip(columns.iter_mut()) {
            if let Some(value) = first_value(&record, spec) {
                column.insert(id.clone(), value);
            }
        }
    }
    debug!(found = columns[0].len(), "Detail lookups complete");

    table.insert_text_column(0, "title", &columns[0])?;
    table.insert_text_column(1, "preprint_date", &columns[1])?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recid_from_reference() {
        assert_eq!(
            recid_from_reference("https://inspirehep.net/api/literature/1234"),
            Some("1234".to_string())
        );
        assert_eq!(
            recid_from_reference("https://inspirehep.net/api/literature/1234/"),
            Some("1234".to_string())
        );
        assert_eq!(recid_from_reference("987"), Some("987".to_string()));
        assert_eq!(recid_from_reference("10.1103/PhysRevD.1.1"), None);
        assert_eq!(recid_from_reference("https://example.org/abc"), None);
    }

    #[test]
    fn test_detail_key() {
        assert_eq!(detail_key("42"), Some(DetailKey::Recid("42".to_string())));
        assert_eq!(
            detail_key("10.1/a"),
            Some(DetailKey::Doi("10.1/a".to_string()))
        );
        assert_eq!(detail_key("arXiv:2101.00001"), None);
    }
}
