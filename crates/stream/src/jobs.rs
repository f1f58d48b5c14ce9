// Job watcher
//
// Design Decision: Job events give up on push after the first failure and
// poll the job snapshot until it is terminal
// (DegradationPolicy::FallbackToPolling).
// Design Decision: A pushed event with a terminal status tears the session
// down and refreshes the snapshot once.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::mode::DegradationPolicy;
use crate::poll::{JobSource, PollFallback};
use crate::push::{PushChannel, PushTransport, SseTransport};
use crate::sequence::SequenceTracker;
use crate::session::{
    ItemCallback, ModeObserver, SessionCore, SessionEnd, SessionHandle, StreamRunner,
};
use crate::store::{Position, SharedStore};
use crate::types::{ConnectionMode, CreateJobRequest, Job, JobEvent};

/// Named server-sent event carrying one job event
pub const JOB_EVENT: &str = "job_event";

enum JobTransport {
    /// One SSE connection per watched job
    Sse,
    /// Shared transport, used regardless of the job id
    Fixed(Arc<dyn PushTransport>),
}

/// Options of a job watch session
#[derive(Clone, Default)]
pub struct JobWatchOptions {
    /// Resume strictly after this sequence; `None` lets the server replay
    pub since_seq: Option<i64>,
    pub on_event: Option<ItemCallback<JobEvent>>,
    pub on_mode: Option<ModeObserver>,
}

impl JobWatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since_seq(mut self, since_seq: i64) -> Self {
        self.since_seq = Some(since_seq);
        self
    }

    pub fn on_event(mut self, on_event: impl Fn(&JobEvent) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(on_event));
        self
    }

    pub fn on_mode(mut self, on_mode: impl Fn(ConnectionMode) + Send + Sync + 'static) -> Self {
        self.on_mode = Some(Arc::new(on_mode));
        self
    }
}

/// Mode of the newest watch session; older sessions no longer write it
#[derive(Debug, Clone, Copy)]
struct ModeSlot {
    session: u64,
    mode: ConnectionMode,
}

/// Creates, fetches and watches background jobs.
///
/// Events of every watched job land in one store keyed by `(job_id, seq)`;
/// use [`JobWatcher::events_for`] for a single job.
pub struct JobWatcher {
    client: ApiClient,
    config: ClientConfig,
    transport: JobTransport,
    source: Arc<dyn JobSource>,
    events: SharedStore<JobEvent>,
    active_job: Arc<Mutex<Option<Job>>>,
    mode: Arc<Mutex<ModeSlot>>,
}

impl JobWatcher {
    pub fn new(client: ApiClient, config: &ClientConfig) -> Self {
        let source: Arc<dyn JobSource> = Arc::new(client.clone());
        Self {
            client,
            config: config.clone(),
            transport: JobTransport::Sse,
            source,
            events: Arc::default(),
            active_job: Arc::new(Mutex::new(None)),
            mode: Arc::new(Mutex::new(ModeSlot {
                session: 0,
                mode: ConnectionMode::Disconnected,
            })),
        }
    }

    /// Use `transport` for every watched job instead of SSE
    pub fn with_transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.transport = JobTransport::Fixed(transport);
        self
    }

    /// Fetch snapshots from `source` instead of the REST client
    pub fn with_job_source(mut self, source: Arc<dyn JobSource>) -> Self {
        self.source = source;
        self
    }

    /// `POST /jobs`; the created job becomes the active job
    pub async fn create_job(&self, request: &CreateJobRequest) -> Result<Job> {
        let job = self.client.create_job(request).await?;
        *self.active_job.lock() = Some(job.clone());
        Ok(job)
    }

    /// Fetch a snapshot; it becomes the active job
    pub async fn fetch_job(&self, job_id: i64) -> Result<Job> {
        let job = self.source.fetch_job(job_id).await?;
        *self.active_job.lock() = Some(job.clone());
        Ok(job)
    }

    /// Seed the event store from `GET /jobs/{id}/events/history`
    pub async fn load_history(&self, job_id: i64) -> Result<Vec<JobEvent>> {
        let history = self.client.job_event_history(job_id).await?;
        self.events.lock().extend(history.iter().cloned());
        debug!(job_id, events = history.len(), "Loaded job event history");
        Ok(history)
    }

    /// Start watching `job_id`: push first, polling after the first failure
    pub fn watch(&self, job_id: i64, options: JobWatchOptions) -> SessionHandle {
        let session = {
            let mut slot = self.mode.lock();
            slot.session += 1;
            slot.session
        };
        let mode_slot = Arc::clone(&self.mode);
        let on_mode = options.on_mode.clone();
        let observer: ModeObserver = Arc::new(move |mode| {
            {
                let mut slot = mode_slot.lock();
                if slot.session == session {
                    slot.mode = mode;
                }
            }
            if let Some(on_mode) = &on_mode {
                on_mode(mode);
            }
        });

        let core = SessionCore::new(
            format!("job:{}", job_id),
            DegradationPolicy::FallbackToPolling,
            self.config.backoff,
            Some(observer),
        );

        let store = Arc::clone(&self.events);
        let on_event = options.on_event.clone();
        let deliver = move |event: JobEvent| {
            store.lock().upsert(event.clone(), Position::Append);
            if let Some(on_event) = &on_event {
                on_event(&event);
            }
        };

        let fallback = PollFallback::new(
            job_id,
            Arc::clone(&self.source),
            self.config.poll_interval,
            Arc::clone(&self.events),
            Arc::clone(&self.active_job),
        )
        .with_on_event(options.on_event.clone());

        let channel = PushChannel::new(self.transport_for(job_id), JOB_EVENT);
        let tracker = SequenceTracker::new(options.since_seq.unwrap_or(0));
        let runner = StreamRunner::new(Arc::clone(&core), channel, tracker, deliver)
            .with_fallback(fallback);

        let task_core = Arc::clone(&core);
        let source = Arc::clone(&self.source);
        let active_job = Arc::clone(&self.active_job);
        let run = async move {
            let end = runner.run().await;
            if end == SessionEnd::TerminalEvent {
                match source.fetch_job(job_id).await {
                    Ok(job) => record_snapshot(&task_core, &active_job, job),
                    Err(e) => debug!(job_id, error = %e, "Terminal snapshot refresh failed"),
                }
            }
            end
        };

        SessionHandle::spawn(core, run)
    }

    /// Snapshot of all held events in arrival order
    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().snapshot()
    }

    /// Events of one job in arrival order
    pub fn events_for(&self, job_id: i64) -> Vec<JobEvent> {
        self.events
            .lock()
            .snapshot()
            .into_iter()
            .filter(|event| event.job_id == job_id)
            .collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Latest snapshot from create, fetch or polling
    pub fn active_job(&self) -> Option<Job> {
        self.active_job.lock().clone()
    }

    /// Mode of the most recently started watch session
    pub fn connection_mode(&self) -> ConnectionMode {
        self.mode.lock().mode
    }

    fn transport_for(&self, job_id: i64) -> Arc<dyn PushTransport> {
        match &self.transport {
            JobTransport::Sse => Arc::new(SseTransport::job_events(self.client.clone(), job_id)),
            JobTransport::Fixed(transport) => Arc::clone(transport),
        }
    }
}

fn record_snapshot(core: &SessionCore, slot: &Mutex<Option<Job>>, job: Job) {
    if let Some(_gate) = core.enter() {
        *slot.lock() = Some(job);
    }
}

impl std::fmt::Debug for JobWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWatcher")
            .field("events", &self.events.lock().len())
            .field("mode", &self.connection_mode())
            .finish_non_exhaustive()
    }
}
