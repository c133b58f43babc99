//! HTTP record store for a PostgREST-style backend.
//!
//! Tables are addressed as `{base_url}/rest/v1/{table}`. Filters become
//! `field=eq.value` query parameters and related collections are embedded
//! through the `select` parameter, e.g. `select=*,participants(*)`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Expand, Filter, Query, RecordStore, StoreError};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow responses while failing fast enough for the reconciler to move on.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// REST API path prefix.
const REST_PATH: &str = "rest/v1";

/// Record store client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: Option<Arc<str>>,
}

impl RestStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    /// Create a store with the given key, sharing the connection pool.
    pub fn with_api_key(&self, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: Some(api_key.into()),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}/{}", self.base_url, REST_PATH, table)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, StoreError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref key) = self.api_key {
            let invalid = |_| StoreError::InvalidRequest("API key contains invalid characters".to_string());
            headers.insert("apikey", header::HeaderValue::from_str(key).map_err(invalid)?);
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", key)).map_err(invalid)?,
            );
        }
        Ok(headers)
    }

    /// Render a filter as PostgREST query parameters.
    fn filter_params(filter: &Filter) -> Vec<(String, String)> {
        filter
            .conditions()
            .iter()
            .map(|(field, value)| {
                let rendered = match value {
                    Value::Null => "is.null".to_string(),
                    Value::String(s) => format!("eq.{}", s),
                    other => format!("eq.{}", other),
                };
                (field.clone(), rendered)
            })
            .collect()
    }

    /// Render embedded collections as a `select` value.
    fn select_param(expand: &[Expand]) -> String {
        let mut select = String::from("*");
        for e in expand {
            select.push(',');
            select.push_str(&e.table);
            select.push('(');
            select.push_str(&Self::select_param(&e.nested));
            select.push(')');
        }
        select
    }

    /// Parse the total out of a `Content-Range` header such as `0-24/57` or `*/0`.
    fn parse_content_range(value: &str) -> Option<usize> {
        value.rsplit('/').next()?.trim().parse().ok()
    }

    /// Check if response is successful.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, StoreError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::from_status(status, &body))
        }
    }

    /// Send a request, backing off while the server rate-limits us.
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, StoreError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build().headers(self.auth_headers()?).send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(StoreError::RateLimited);
                    }
                    warn!(retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn rows(response: Response) -> Result<Vec<Value>, StoreError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text)
            .map_err(|e| StoreError::InvalidResponse(format!("expected row array: {}", e)))
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn fetch(&self, query: &Query) -> Result<Vec<Value>, StoreError> {
        let url = self.table_url(&query.table);
        let mut params = Self::filter_params(&query.filter);
        params.push(("select".to_string(), Self::select_param(&query.expand)));
        debug!(table = %query.table, ?params, "GET rows");

        let response = self.send(|| self.client.get(&url).query(&params)).await?;
        Self::rows(response).await
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError> {
        let url = self.table_url(table);
        debug!(table, "POST row");

        let response = self
            .send(|| {
                self.client
                    .post(&url)
                    .header("Prefer", "return=representation")
                    .json(&row)
            })
            .await?;

        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidResponse(format!("insert into {} returned no row", table)))
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> Result<usize, StoreError> {
        if filter.is_empty() {
            return Err(StoreError::InvalidRequest(format!("refusing unfiltered update of {}", table)));
        }
        let url = self.table_url(table);
        let params = Self::filter_params(filter);
        debug!(table, ?params, "PATCH rows");

        let response = self
            .send(|| {
                self.client
                    .patch(&url)
                    .query(&params)
                    .header("Prefer", "return=representation")
                    .json(&patch)
            })
            .await?;

        Ok(Self::rows(response).await?.len())
    }

    async fn count(&self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        let url = self.table_url(table);
        let params = Self::filter_params(filter);

        let response = self
            .send(|| {
                self.client
                    .head(&url)
                    .query(&params)
                    .header("Prefer", "count=exact")
            })
            .await?;

        response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse_content_range)
            .ok_or_else(|| StoreError::InvalidResponse(format!("count of {} missing Content-Range", table)))
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        if filter.is_empty() {
            return Err(StoreError::InvalidRequest(format!("refusing unfiltered delete of {}", table)));
        }
        let url = self.table_url(table);
        let params = Self::filter_params(filter);
        debug!(table, ?params, "DELETE rows");

        let response = self
            .send(|| {
                self.client
                    .delete(&url)
                    .query(&params)
                    .header("Prefer", "return=representation")
            })
            .await?;

        Ok(Self::rows(response).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_url_trims_slash() {
        let store = RestStore::new("https://db.example.com/").unwrap();
        assert_eq!(store.table_url("tours"), "https://db.example.com/rest/v1/tours");
    }

    #[test]
    fn test_filter_params() {
        let filter = Filter::by_id("g1").eq("version", 4).eq("guide_id", Value::Null);
        let params = RestStore::filter_params(&filter);
        assert_eq!(params, vec![
            ("id".to_string(), "eq.g1".to_string()),
            ("version".to_string(), "eq.4".to_string()),
            ("guide_id".to_string(), "is.null".to_string()),
        ]);
    }

    #[test]
    fn test_select_param_nested() {
        let expand = vec![Expand::new("tour_groups", "tour_id").with(Expand::new("participants", "group_id"))];
        assert_eq!(RestStore::select_param(&expand), "*,tour_groups(*,participants(*))");
        assert_eq!(RestStore::select_param(&[]), "*");
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(RestStore::parse_content_range("0-24/57"), Some(57));
        assert_eq!(RestStore::parse_content_range("*/0"), Some(0));
        assert_eq!(RestStore::parse_content_range("0-24/*"), None);
    }
}
