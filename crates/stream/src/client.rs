// HTTP client wrapper for the Pressluft API
//
// Design Decision: One reqwest::Client per ApiClient; push transports borrow it
// so connection pooling and TLS setup are shared.
// Design Decision: REST failures are surfaced, never retried here. Retry and
// backoff only apply to push channels.

use std::time::Duration;

use reqwest::{header, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::types::{
    Activity, ActivityFilter, ActivityPage, CreateJobRequest, Job, JobEvent, UnreadCount,
};

/// Error envelope of non-2xx responses
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<String>,
}

/// Typed client for the REST endpoints
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    request_timeout: Option<Duration>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            http,
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Request builder for a long-lived event stream (no request timeout)
    pub(crate) fn event_stream(&self, path: &str) -> RequestBuilder {
        self.http
            .get(self.url(path))
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
    }

    // ------------------------------------------------------------------
    // Activity
    // ------------------------------------------------------------------

    /// `GET /activity` - one page of the activity feed
    pub async fn list_activity(
        &self,
        filter: &ActivityFilter,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<ActivityPage> {
        let query = page_query(filter, cursor, limit);
        self.get("/activity", &query).await
    }

    /// `GET /servers/{id}/activity` - one page of a server's activity
    pub async fn list_server_activity(
        &self,
        server_id: i64,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<ActivityPage> {
        let query = page_query(&ActivityFilter::default(), cursor, limit);
        self.get(&format!("/servers/{}/activity", server_id), &query)
            .await
    }

    /// `GET /activity/unread-count`
    pub async fn unread_count(&self, filter: &ActivityFilter) -> Result<u64> {
        let response: UnreadCount = self
            .get("/activity/unread-count", &filter.query_pairs())
            .await?;
        Ok(response.count)
    }

    /// `POST /activity/{id}/read` - returns the updated record
    pub async fn mark_activity_read(&self, activity_id: i64) -> Result<Activity> {
        self.post_empty(&format!("/activity/{}/read", activity_id), &[])
            .await
    }

    /// `POST /activity/read-all`
    pub async fn mark_all_activity_read(&self, filter: &ActivityFilter) -> Result<()> {
        let _: serde_json::Value = self
            .post_empty("/activity/read-all", &filter.query_pairs())
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// `POST /jobs`
    pub async fn create_job(&self, request: &CreateJobRequest) -> Result<Job> {
        let builder = self.http.post(self.url("/jobs")).json(request);
        self.send(builder).await
    }

    /// `GET /jobs/{id}`
    pub async fn get_job(&self, job_id: i64) -> Result<Job> {
        self.get(&format!("/jobs/{}", job_id), &[]).await
    }

    /// `GET /jobs/{id}/events/history`
    pub async fn job_event_history(&self, job_id: i64) -> Result<Vec<JobEvent>> {
        self.get(&format!("/jobs/{}/events/history", job_id), &[])
            .await
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let mut builder = self.http.get(self.url(path));
        if !query.is_empty() {
            builder = builder.query(query);
        }
        self.send(builder).await
    }

    async fn post_empty<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut builder = self.http.post(self.url(path));
        if !query.is_empty() {
            builder = builder.query(query);
        }
        self.send(builder).await
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let builder = match self.request_timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        };
        let response = builder.send().await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let body = response.bytes().await?;
        // Endpoints that answer with an empty body still decode into `Value`
        if body.is_empty() {
            return Ok(serde_json::from_slice(b"null")?);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Build an [`ApiError`] from a non-2xx response.
///
/// Prefers the `{error}` envelope, then the status text.
pub(crate) async fn error_from_response(response: Response) -> ApiError {
    let status = response.status();
    let fallback = status.canonical_reason().unwrap_or("request failed");

    let message = match response.json::<ErrorEnvelope>().await {
        Ok(ErrorEnvelope {
            error: Some(message),
        }) if !message.trim().is_empty() => message,
        _ => fallback.to_string(),
    };

    debug!(status = status.as_u16(), message = %message, "API request failed");
    ApiError::api(status.as_u16(), message)
}

fn page_query(
    filter: &ActivityFilter,
    cursor: Option<&str>,
    limit: Option<u32>,
) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
        query.push(("cursor", cursor.to_string()));
    }
    if let Some(limit) = limit.filter(|l| *l > 0) {
        query.push(("limit", limit.to_string()));
    }
    query.extend(filter.query_pairs());
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_query_orders_cursor_first() {
        let filter = ActivityFilter::new().with_category("server");
        let query = page_query(&filter, Some("c1"), Some(25));
        assert_eq!(
            query,
            vec![
                ("cursor", "c1".to_string()),
                ("limit", "25".to_string()),
                ("category", "server".to_string()),
            ]
        );
    }

    #[test]
    fn test_page_query_skips_empty_cursor_and_zero_limit() {
        let query = page_query(&ActivityFilter::default(), Some(""), Some(0));
        assert!(query.is_empty());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = ClientConfig::default().with_api_url("http://127.0.0.1:9/api/");
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(client.url("/jobs/1"), "http://127.0.0.1:9/api/jobs/1");
    }
}
