//! INSPIRE-HEP literature API client.
//!
//! Thin transport for paged literature searches. Every fetch receives an
//! immutable [`RequestConfig`]; the client holds no per-query state.
//!
//! API details:
//! - Search endpoint: GET /api/literature?q=..&sort=..&size=..&page=..&fields=..
//! - Single record: GET /api/literature/<recid>?fields=..
//! - Body: `{"hits": {"hits": [...], "total": N}}`
//! - HTTP 429 is retried with exponential backoff

use crate::error::{CitevoError, OptionExt, Result};
use crate::flatten::RawRecord;
use crate::period::Period;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// INSPIRE literature API base URL
pub const INSPIRE_API_URL: &str = "https://inspirehep.net/api/literature";

/// Results per page requested by default
pub const DEFAULT_PAGE_SIZE: usize = 200;

/// Default sort order
pub const DEFAULT_SORT: &str = "mostcited";

/// Default number of pages fetched at once
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// One search request, passed explicitly to every page fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestConfig {
    /// Free-text query, already carrying date and identifier filters
    pub query: String,
    pub sort: Option<String>,
    pub page_size: usize,
    /// Comma-separated field list
    pub fields: String,
}

impl RequestConfig {
    pub fn new(query: impl Into<String>, fields: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            sort: Some(DEFAULT_SORT.to_string()),
            page_size: DEFAULT_PAGE_SIZE,
            fields: fields.into(),
        }
    }
}

/// Hits from one page plus the total hit count reported by the API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub hits: Vec<RawRecord>,
    pub total: u64,
}

/// Outcome of one page in a concurrent fetch
#[derive(Debug)]
pub struct PageFetch {
    pub page: u32,
    pub outcome: Result<PageResult>,
}

/// Source of literature records.
///
/// Implemented by [`InspireClient`]; tests substitute in-memory sources.
pub trait MetadataSource: Sync {
    /// Fetch page `page` (1-indexed) of `request`
    fn fetch_page(
        &self,
        request: &RequestConfig,
        page: u32,
    ) -> impl Future<Output = Result<PageResult>> + Send;

    /// Fetch a single record by record id
    fn fetch_record(
        &self,
        recid: &str,
        fields: &str,
    ) -> impl Future<Output = Result<RawRecord>> + Send;
}

/// Record-id range filter, written `low->high` in queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierRange {
    pub low: u64,
    pub high: u64,
}

impl IdentifierRange {
    /// Parse `low->high`
    pub fn parse(input: &str) -> Result<Self> {
        let (low, high) = input
            .split_once("->")
            .ok_or_else(|| CitevoError::Config(format!("Invalid range '{}': expected low->high", input)))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| CitevoError::Config(format!("Invalid range bound '{}'", s)))
        };
        let (low, high) = (parse(low)?, parse(high)?);
        if low > high {
            return Err(CitevoError::Config(format!("Empty range {}->{}", low, high)));
        }
        Ok(Self { low, high })
    }
}

/// Query selecting records dated within `period`, optionally restricted to
/// a control-number range
pub fn build_period_query(period: &Period, id_range: Option<IdentifierRange>) -> String {
    let (start, end) = period.query_bounds();
    let mut query = format!("de {}->{}", start, end);
    if let Some(range) = id_range {
        query.push_str(&format!(" and control_number:{}->{}", range.low, range.high));
    }
    query
}

/// Parse a search response body into a [`PageResult`].
///
/// A body that is a JSON string holding the response is decoded first.
pub fn parse_page(body: &serde_json::Value) -> Result<PageResult> {
    if let Some(text) = body.as_str() {
        let decoded: serde_json::Value = serde_json::from_str(text)?;
        return parse_page(&decoded);
    }

    let hits = body.get("hits").ok_or_parse("Response has no hits object")?;
    let records = hits
        .get("hits")
        .and_then(|h| h.as_array())
        .ok_or_parse("Response has no hits.hits list")?;

    // Older deployments report {"value": N}
    let total = hits
        .get("total")
        .and_then(|t| t.as_u64().or_else(|| t.get("value").and_then(|v| v.as_u64())))
        .unwrap_or(records.len() as u64);

    Ok(PageResult {
        hits: records.clone(),
        total,
    })
}

/// Fetch pages `1..=page_count` with at most `concurrency` in flight.
///
/// Each page succeeds or fails on its own; failures are logged and
/// returned in place. Results are sorted by page number.
pub async fn fetch_all_pages<S: MetadataSource>(
    source: &S,
    request: &RequestConfig,
    page_count: u32,
    concurrency: usize,
) -> Vec<PageFetch> {
    let mut fetches: Vec<PageFetch> = stream::iter(1..=page_count)
        .map(|page| async move {
            debug!(page = page, "Fetching page");
            let outcome = source.fetch_page(request, page).await;
            if let Err(e) = &outcome {
                warn!(page = page, error = %e, "Failed to fetch page");
            }
            PageFetch { page, outcome }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    fetches.sort_by_key(|f| f.page);
    fetches
}

/// Fetch pages one at a time until a page comes back empty, a page fails,
/// or `max_pages` pages have been read.
pub async fn fetch_sequential<S: MetadataSource>(
    source: &S,
    request: &RequestConfig,
    max_pages: u32,
) -> Result<Vec<PageResult>> {
    let mut pages = Vec::new();
    for page in 1..=max_pages {
        let result = source.fetch_page(request, page).await?;
        if result.hits.is_empty() {
            break;
        }
        pages.push(result);
    }
    Ok(pages)
}

/// HTTP client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: INSPIRE_API_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// reqwest-backed INSPIRE client
pub struct InspireClient {
    client: Client,
    config: ClientConfig,
}

impl InspireClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent("citevo/0.1")
            .build()
            .map_err(|e| CitevoError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Search URL for one page
    fn build_search_url(&self, request: &RequestConfig, page: u32) -> String {
        let mut url = format!(
            "{}?q={}&size={}&page={}",
            self.base_url(),
            urlencoding::encode(&request.query),
            request.page_size,
            page
        );
        if let Some(sort) = &request.sort {
            url.push_str(&format!("&sort={}", urlencoding::encode(sort)));
        }
        if !request.fields.is_empty() {
            url.push_str(&format!("&fields={}", urlencoding::encode(&request.fields)));
        }
        url
    }

    /// GET a JSON body, retrying on HTTP 429
    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let mut retries = 0;

        loop {
            debug!(url = %url, "GET");
            let response = self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await?;
            let status = response.status();

            if status.is_success() {
                let text = response.text().await?;
                return serde_json::from_str(&text).map_err(|e| {
                    CitevoError::Parse(format!("Failed to parse INSPIRE response: {}", e))
                });
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retries < self.config.max_retries {
                    let jitter = Duration::from_millis(rand::random::<u64>() % 500);
                    let backoff = Duration::from_secs(2u64.pow(retries)) + jitter;
                    warn!(
                        retries = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    retries += 1;
                    continue;
                }
                return Err(CitevoError::RateLimited(60));
            }

            return Err(CitevoError::Api {
                code: status.as_u16() as i32,
                message: format!("INSPIRE API error: {}", status),
            });
        }
    }
}

impl MetadataSource for InspireClient {
    async fn fetch_page(&self, request: &RequestConfig, page: u32) -> Result<PageResult> {
        let url = self.build_search_url(request, page);
        let body = self.get_json(&url).await?;
        let result = parse_page(&body)?;
        info!(page = page, hits = result.hits.len(), total = result.total, "Fetched page");
        Ok(result)
    }

    async fn fetch_record(&self, recid: &str, fields: &str) -> Result<RawRecord> {
        let mut url = format!("{}/{}", self.base_url(), urlencoding::encode(recid));
        if !fields.is_empty() {
            url.push_str(&format!("?fields={}", urlencoding::encode(fields)));
        }
        self.get_json(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::period_containing;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeSource {
        pages: u32,
        failing: Option<u32>,
        calls: AtomicU32,
    }

    impl MetadataSource for FakeSource {
        async fn fetch_page(&self, _request: &RequestConfig, page: u32) -> Result<PageResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(page) == self.failing {
                return Err(CitevoError::Api {
                    code: 500,
                    message: "boom".to_string(),
                });
            }
            let hits = if page <= self.pages {
                vec![json!({"metadata": {"control_number": page}})]
            } else {
                Vec::new()
            };
            Ok(PageResult {
                hits,
                total: self.pages as u64,
            })
        }

        async fn fetch_record(&self, recid: &str, _fields: &str) -> Result<RawRecord> {
            Ok(json!({"metadata": {"control_number": recid}}))
        }
    }

    fn fake(pages: u32, failing: Option<u32>) -> FakeSource {
        FakeSource {
            pages,
            failing,
            calls: AtomicU32::new(0),
        }
    }

    #[test]
    fn test_build_period_query() {
        let period = period_containing(NaiveDate::from_ymd_opt(2024, 8, 15).unwrap(), 2).unwrap();
        assert_eq!(build_period_query(&period, None), "de 2024-07-01->2024-08-31");
        let range = IdentifierRange::parse("10001->20000").unwrap();
        assert_eq!(
            build_period_query(&period, Some(range)),
            "de 2024-07-01->2024-08-31 and control_number:10001->20000"
        );
    }

    #[test]
    fn test_identifier_range_parse() {
        assert_eq!(
            IdentifierRange::parse(" 5 -> 9 ").unwrap(),
            IdentifierRange { low: 5, high: 9 }
        );
        assert!(IdentifierRange::parse("9->5").is_err());
        assert!(IdentifierRange::parse("5-9").is_err());
        assert!(IdentifierRange::parse("a->b").is_err());
    }

    #[test]
    fn test_build_search_url() {
        let client = InspireClient::new(ClientConfig::default()).unwrap();
        let request = RequestConfig::new("de 2024-07-01->2024-08-31", "titles.title,citation_count");
        let url = client.build_search_url(&request, 2);
        assert!(url.starts_with("https://inspirehep.net/api/literature?q=de%202024-07-01-%3E2024-08-31"));
        assert!(url.contains("size=200"));
        assert!(url.contains("page=2"));
        assert!(url.contains("sort=mostcited"));
        assert!(url.contains("fields=titles.title%2Ccitation_count"));
    }

    #[test]
    fn test_parse_page() {
        let body = json!({"hits": {"hits": [{"metadata": {}}, {"metadata": {}}], "total": 57}});
        let page = parse_page(&body).unwrap();
        assert_eq!(page.hits.len(), 2);
        assert_eq!(page.total, 57);

        let legacy = json!({"hits": {"hits": [], "total": {"value": 3}}});
        assert_eq!(parse_page(&legacy).unwrap().total, 3);

        let encoded = serde_json::Value::String(body.to_string());
        assert_eq!(parse_page(&encoded).unwrap().hits.len(), 2);

        assert!(parse_page(&json!({"links": {}})).is_err());
        assert!(parse_page(&json!({"hits": {"total": 1}})).is_err());
    }

    #[tokio::test]
    async fn test_fetch_all_pages_isolates_failures() {
        let source = fake(5, Some(3));
        let request = RequestConfig::new("q", "");
        let fetches = fetch_all_pages(&source, &request, 5, 2).await;

        assert_eq!(fetches.iter().map(|f| f.page).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert!(fetches[2].outcome.is_err());
        assert_eq!(fetches.iter().filter(|f| f.outcome.is_ok()).count(), 4);
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_fetch_sequential_stops_on_empty_page() {
        let source = fake(2, None);
        let request = RequestConfig::new("q", "");
        let pages = fetch_sequential(&source, &request, 10).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        let failing = fake(5, Some(2));
        assert!(fetch_sequential(&failing, &request, 10).await.is_err());
    }
}
