// In-memory implementations for testing and development
//
// Design Decision: Scripts are consumed in order, one entry per call, so a
// test describes exactly what each connection attempt or snapshot fetch sees.
// Every call is recorded with its tokio instant for timing assertions under
// paused time.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{ApiError, Result, TransportError};
use crate::poll::JobSource;
use crate::push::{PushTransport, RawMessage, RawMessageStream};
use crate::types::{Activity, Job, JobEvent, JobStatus, Level};

// ============================================================================
// Push transport
// ============================================================================

enum Ending {
    /// Server closes the connection after the scripted messages
    Close,
    /// Connection stays open without further messages
    HoldOpen,
    /// Messages keep arriving through a [`LiveSender`]
    Live(mpsc::UnboundedReceiver<std::result::Result<RawMessage, TransportError>>),
}

/// Script for one push connection
pub struct ScriptedConnection {
    messages: Vec<std::result::Result<RawMessage, TransportError>>,
    ending: Ending,
}

impl Default for ScriptedConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            ending: Ending::Close,
        }
    }

    /// Connection fed at runtime; ends when the sender is closed or dropped
    pub fn live() -> (Self, LiveSender) {
        let (tx, rx) = mpsc::unbounded();
        let connection = Self {
            messages: Vec::new(),
            ending: Ending::Live(rx),
        };
        (connection, LiveSender { tx })
    }

    pub fn message(mut self, event: impl Into<String>, data: impl Into<String>) -> Self {
        self.messages.push(Ok(RawMessage::new(event, data)));
        self
    }

    /// Serialize `value` as the payload of a named event
    pub fn json<T: serde::Serialize>(self, event: impl Into<String>, value: &T) -> Self {
        let data = serde_json::to_string(value).unwrap_or_default();
        self.message(event, data)
    }

    /// Fail the connection at this point
    pub fn failure(mut self, error: TransportError) -> Self {
        self.messages.push(Err(error));
        self
    }

    /// Keep the connection open after the scripted messages
    pub fn hold_open(mut self) -> Self {
        self.ending = Ending::HoldOpen;
        self
    }

    fn into_stream(self) -> RawMessageStream {
        let head = stream::iter(self.messages);
        match self.ending {
            Ending::Close => head.boxed(),
            Ending::HoldOpen => head.chain(stream::pending()).boxed(),
            Ending::Live(rx) => head.chain(rx).boxed(),
        }
    }
}

/// Feeds a live [`ScriptedConnection`]
#[derive(Clone)]
pub struct LiveSender {
    tx: mpsc::UnboundedSender<std::result::Result<RawMessage, TransportError>>,
}

impl LiveSender {
    /// Returns false once the connection is gone
    pub fn send(&self, event: impl Into<String>, data: impl Into<String>) -> bool {
        self.tx
            .unbounded_send(Ok(RawMessage::new(event, data)))
            .is_ok()
    }

    pub fn json<T: serde::Serialize>(&self, event: impl Into<String>, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(data) => self.send(event, data),
            Err(_) => false,
        }
    }

    pub fn fail(&self, error: TransportError) -> bool {
        self.tx.unbounded_send(Err(error)).is_ok()
    }

    /// End the stream as a server close would
    pub fn close(&self) {
        self.tx.close_channel();
    }
}

enum ScriptedOpen {
    Connection(ScriptedConnection),
    Fail(TransportError),
}

#[derive(Default)]
struct TransportScript {
    opens: VecDeque<ScriptedOpen>,
    opened_with: Vec<Option<i64>>,
    opened_at: Vec<Instant>,
}

/// Push transport that replays scripted connections.
///
/// When the script is exhausted every further open fails with
/// [`TransportError::Connect`].
#[derive(Default)]
pub struct ScriptedPushTransport {
    script: Mutex<TransportScript>,
}

impl ScriptedPushTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_connection(&self, connection: ScriptedConnection) {
        self.script
            .lock()
            .opens
            .push_back(ScriptedOpen::Connection(connection));
    }

    /// Make the next open attempt fail
    pub fn push_open_failure(&self, error: TransportError) {
        self.script.lock().opens.push_back(ScriptedOpen::Fail(error));
    }

    /// Resume cursors passed to each open attempt, in order
    pub fn opened_with(&self) -> Vec<Option<i64>> {
        self.script.lock().opened_with.clone()
    }

    /// Instants of each open attempt, in order
    pub fn open_times(&self) -> Vec<Instant> {
        self.script.lock().opened_at.clone()
    }

    pub fn open_count(&self) -> usize {
        self.script.lock().opened_with.len()
    }
}

#[async_trait]
impl PushTransport for ScriptedPushTransport {
    async fn open(
        &self,
        resume_from: Option<i64>,
    ) -> std::result::Result<RawMessageStream, TransportError> {
        let next = {
            let mut script = self.script.lock();
            script.opened_with.push(resume_from);
            script.opened_at.push(Instant::now());
            script.opens.pop_front()
        };

        match next {
            Some(ScriptedOpen::Connection(connection)) => Ok(connection.into_stream()),
            Some(ScriptedOpen::Fail(error)) => Err(error),
            None => Err(TransportError::Connect(
                "no scripted connection left".to_string(),
            )),
        }
    }
}

// ============================================================================
// Job snapshots
// ============================================================================

enum ScriptedSnapshot {
    Job(Job),
    Fail { status: u16, message: String },
}

#[derive(Default)]
struct SnapshotScript {
    snapshots: VecDeque<ScriptedSnapshot>,
    last: Option<Job>,
    fetched_at: Vec<Instant>,
}

/// Job source that replays scripted snapshots.
///
/// Once the script is exhausted the last returned job is repeated.
#[derive(Default)]
pub struct InMemoryJobSource {
    script: Mutex<SnapshotScript>,
}

impl InMemoryJobSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_job(&self, job: Job) {
        self.script
            .lock()
            .snapshots
            .push_back(ScriptedSnapshot::Job(job));
    }

    pub fn push_failure(&self, status: u16, message: impl Into<String>) {
        self.script.lock().snapshots.push_back(ScriptedSnapshot::Fail {
            status,
            message: message.into(),
        });
    }

    pub fn fetch_count(&self) -> usize {
        self.script.lock().fetched_at.len()
    }

    pub fn fetch_times(&self) -> Vec<Instant> {
        self.script.lock().fetched_at.clone()
    }
}

#[async_trait]
impl JobSource for InMemoryJobSource {
    async fn fetch_job(&self, job_id: i64) -> Result<Job> {
        let mut script = self.script.lock();
        script.fetched_at.push(Instant::now());

        match script.snapshots.pop_front() {
            Some(ScriptedSnapshot::Job(job)) => {
                script.last = Some(job.clone());
                Ok(job)
            }
            Some(ScriptedSnapshot::Fail { status, message }) => Err(ApiError::api(status, message)),
            None => script
                .last
                .clone()
                .ok_or_else(|| ApiError::api(404, format!("job {} not found", job_id))),
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Job snapshot with the given status and current step
pub fn job(id: i64, status: JobStatus, current_step: &str) -> Job {
    let now = Utc::now();
    Job {
        id,
        server_id: None,
        kind: "provision_site".to_string(),
        status,
        current_step: current_step.to_string(),
        retry_count: 0,
        last_error: None,
        created_at: now,
        updated_at: now,
    }
}

/// Job event with the given sequence and optional status
pub fn job_event(job_id: i64, seq: i64, status: Option<JobStatus>, message: &str) -> JobEvent {
    JobEvent {
        job_id,
        seq,
        event_type: "step_update".to_string(),
        level: Level::Info,
        step_key: None,
        status,
        message: message.to_string(),
        payload: None,
        occurred_at: Utc::now(),
    }
}

/// Unread activity entry
pub fn activity(id: i64, title: &str) -> Activity {
    Activity {
        id,
        event_type: "job.completed".to_string(),
        category: "job".to_string(),
        level: Level::Info,
        resource_type: None,
        resource_id: None,
        parent_resource_type: None,
        parent_resource_id: None,
        actor_type: "system".to_string(),
        actor_id: None,
        title: title.to_string(),
        message: None,
        payload: None,
        requires_attention: false,
        read_at: None,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exhausted_transport_fails_to_connect() {
        let transport = ScriptedPushTransport::new();
        transport.push_open_failure(TransportError::Rejected { status: 503 });

        assert_eq!(
            transport.open(None).await.err(),
            Some(TransportError::Rejected { status: 503 })
        );
        assert!(matches!(
            transport.open(Some(3)).await.err(),
            Some(TransportError::Connect(_))
        ));
        assert_eq!(transport.opened_with(), vec![None, Some(3)]);
    }

    #[tokio::test]
    async fn test_live_connection_ends_on_close() {
        let (connection, sender) = ScriptedConnection::live();
        let transport = ScriptedPushTransport::new();
        transport.push_connection(connection.message("ping", "1"));

        let stream = transport.open(None).await.unwrap();
        assert!(sender.send("ping", "2"));
        sender.close();

        let data: Vec<String> = stream
            .map(|m| m.unwrap().data)
            .collect::<Vec<_>>()
            .await;
        assert_eq!(data, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_job_source_repeats_last_snapshot() {
        let source = InMemoryJobSource::new();
        source.push_failure(502, "bad gateway");
        source.push_job(job(4, JobStatus::Running, "install"));

        assert_eq!(source.fetch_job(4).await.unwrap_err().status(), Some(502));
        assert_eq!(source.fetch_job(4).await.unwrap().current_step, "install");
        assert_eq!(source.fetch_job(4).await.unwrap().current_step, "install");
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_job_source_without_script_is_not_found() {
        let source = InMemoryJobSource::new();
        assert_eq!(source.fetch_job(9).await.unwrap_err().status(), Some(404));
    }
}
