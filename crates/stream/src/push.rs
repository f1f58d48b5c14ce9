// Push channel
//
// A transport produces a lazy, non-restartable stream of raw messages for one
// connection. PushChannel opens connections and PushConnection parses them.
// A connection reports at most one transport failure and is inert afterwards;
// reconnecting is the caller's job (see `session`).

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::client::ApiClient;
use crate::error::TransportError;

/// Name of the server-sent event that announces a server-side failure
const ERROR_EVENT: &str = "error";

/// One server-pushed message, not yet interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Event name (`message` when the server sent none)
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

impl RawMessage {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }
}

/// Raw messages of a single connection
pub type RawMessageStream = BoxStream<'static, Result<RawMessage, TransportError>>;

/// Opens push connections
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open one connection that resumes strictly after `resume_from`
    /// (`None` means "from now").
    async fn open(&self, resume_from: Option<i64>) -> Result<RawMessageStream, TransportError>;
}

// ============================================================================
// Server-Sent Events transport
// ============================================================================

/// Push transport over Server-Sent Events
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: ApiClient,
    path: String,
    resume_param: &'static str,
}

impl SseTransport {
    pub fn new(client: ApiClient, path: impl Into<String>, resume_param: &'static str) -> Self {
        Self {
            client,
            path: path.into(),
            resume_param,
        }
    }

    /// `GET /activity/stream?since_id=<n>`
    pub fn activity(client: ApiClient) -> Self {
        Self::new(client, "/activity/stream", "since_id")
    }

    /// `GET /jobs/{id}/events?since_seq=<n>`
    pub fn job_events(client: ApiClient, job_id: i64) -> Self {
        Self::new(client, format!("/jobs/{}/events", job_id), "since_seq")
    }
}

#[async_trait]
impl PushTransport for SseTransport {
    async fn open(&self, resume_from: Option<i64>) -> Result<RawMessageStream, TransportError> {
        let mut request = self.client.event_stream(&self.path);
        if let Some(since) = resume_from.filter(|s| *s > 0) {
            request = request.query(&[(self.resume_param, since.to_string())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected {
                status: status.as_u16(),
            });
        }

        if let Some(content_type) = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !content_type.starts_with("text/event-stream") {
                return Err(TransportError::Unsupported(content_type.to_string()));
            }
        }

        info!(path = %self.path, since = ?resume_from, "Push connection opened");

        let stream = response
            .bytes_stream()
            .eventsource()
            .map(|result| match result {
                Ok(event) => Ok(RawMessage {
                    event: event.event,
                    data: event.data,
                    id: (!event.id.is_empty()).then_some(event.id),
                }),
                Err(e) => Err(TransportError::Stream(e.to_string())),
            });

        Ok(stream.boxed())
    }
}

// ============================================================================
// Typed channel
// ============================================================================

/// Opens typed connections for one named event
pub struct PushChannel<T> {
    transport: Arc<dyn PushTransport>,
    event_name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for PushChannel<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            event_name: self.event_name,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> PushChannel<T> {
    pub fn new(transport: Arc<dyn PushTransport>, event_name: &'static str) -> Self {
        Self {
            transport,
            event_name,
            _marker: PhantomData,
        }
    }

    pub fn event_name(&self) -> &'static str {
        self.event_name
    }

    pub async fn open(&self, resume_from: Option<i64>) -> Result<PushConnection<T>, TransportError> {
        let stream = self.transport.open(resume_from).await?;
        Ok(PushConnection {
            stream: Some(stream),
            event_name: self.event_name,
            malformed: 0,
            _marker: PhantomData,
        })
    }
}

/// One open push connection.
///
/// Yields parsed payloads; malformed payloads and other event names are
/// skipped. The first failure is yielded once as `Err`, after which the
/// connection is closed and yields `None`.
pub struct PushConnection<T> {
    stream: Option<RawMessageStream>,
    event_name: &'static str,
    malformed: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> PushConnection<T> {
    pub async fn next(&mut self) -> Option<Result<T, TransportError>> {
        loop {
            let stream = self.stream.as_mut()?;

            let raw = match stream.next().await {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => return Some(Err(self.fail(e))),
                None => return Some(Err(self.fail(TransportError::Closed))),
            };

            if raw.event == ERROR_EVENT && self.event_name != ERROR_EVENT {
                let message = server_error_message(&raw.data);
                return Some(Err(self.fail(TransportError::Stream(message))));
            }
            if raw.event != self.event_name {
                continue;
            }

            match serde_json::from_str::<T>(&raw.data) {
                Ok(parsed) => return Some(Ok(parsed)),
                Err(e) => {
                    self.malformed += 1;
                    debug!(event = %raw.event, error = %e, "Dropping malformed push payload");
                }
            }
        }
    }

    /// Close the connection; further `next` calls yield `None`
    pub fn close(&mut self) {
        self.stream = None;
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Number of payloads dropped because they failed to parse
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    fn fail(&mut self, error: TransportError) -> TransportError {
        self.stream = None;
        error
    }
}

fn server_error_message(data: &str) -> String {
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| data.to_string())
}
