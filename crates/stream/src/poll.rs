// Polling fallback for job sessions
//
// Design Decision: Once a job session falls back to polling it never returns
// to push. Each tick fetches the job snapshot; a step that the event store has
// not seen yet (same step key and status) becomes a synthetic `step_update`
// event so progress keeps flowing through the same store and callbacks.
// Design Decision: Fetch failures are swallowed and retried on the next tick.
// Polling stops at the first terminal status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::client::ApiClient;
use crate::error::Result;
use crate::mode::ModeInput;
use crate::session::{cancelled, ItemCallback, SessionCore, SessionEnd};
use crate::store::{EventStore, Position, SharedStore};
use crate::types::{Job, JobEvent, Level};

/// Event type of events synthesized from job snapshots
pub const SYNTHETIC_EVENT_TYPE: &str = "step_update";

/// Source of job snapshots
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_job(&self, job_id: i64) -> Result<Job>;
}

#[async_trait]
impl JobSource for ApiClient {
    async fn fetch_job(&self, job_id: i64) -> Result<Job> {
        self.get_job(job_id).await
    }
}

/// Strictly increasing millisecond timestamps
#[derive(Debug, Default)]
struct SyntheticClock {
    last: i64,
}

impl SyntheticClock {
    fn next(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last = now.max(self.last + 1);
        self.last
    }
}

/// Periodic snapshot fetcher that stands in for a failed push channel
pub struct PollFallback {
    job_id: i64,
    source: Arc<dyn JobSource>,
    interval: Duration,
    clock: SyntheticClock,
    events: SharedStore<JobEvent>,
    latest: Arc<Mutex<Option<Job>>>,
    on_event: Option<ItemCallback<JobEvent>>,
}

impl PollFallback {
    pub fn new(
        job_id: i64,
        source: Arc<dyn JobSource>,
        interval: Duration,
        events: SharedStore<JobEvent>,
        latest: Arc<Mutex<Option<Job>>>,
    ) -> Self {
        Self {
            job_id,
            source,
            // tokio intervals reject a zero period
            interval: interval.max(Duration::from_millis(1)),
            clock: SyntheticClock::default(),
            events,
            latest,
            on_event: None,
        }
    }

    pub fn with_on_event(mut self, on_event: Option<ItemCallback<JobEvent>>) -> Self {
        self.on_event = on_event;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Build the progress event for `job`, unless `store` already holds an
    /// event of this job for the same step key and status
    pub fn synthesize(&mut self, job: &Job, store: &EventStore<JobEvent>) -> Option<JobEvent> {
        let step = job.current_step.as_str();
        if step.is_empty() {
            return None;
        }

        let seen = store.any(|event| {
            event.job_id == self.job_id
                && event.step_key.as_deref() == Some(step)
                && event.status.as_ref() == Some(&job.status)
        });
        if seen {
            return None;
        }

        Some(JobEvent {
            job_id: self.job_id,
            seq: self.clock.next(),
            event_type: SYNTHETIC_EVENT_TYPE.to_string(),
            level: Level::Info,
            step_key: Some(step.to_string()),
            status: Some(job.status.clone()),
            message: format!("Step: {}", step),
            payload: None,
            occurred_at: job.updated_at,
        })
    }

    pub(crate) async fn run(
        mut self,
        core: &SessionCore,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        info!(
            job_id = self.job_id,
            interval_ms = self.interval.as_millis() as u64,
            "Polling job status"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancelled(shutdown) => return SessionEnd::Disposed,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                _ = cancelled(shutdown) => return SessionEnd::Disposed,
                fetched = self.source.fetch_job(self.job_id) => fetched,
            };

            match fetched {
                Ok(job) => match self.apply(core, job) {
                    Some(true) => return SessionEnd::TerminalSnapshot,
                    Some(false) => {}
                    None => return SessionEnd::Disposed,
                },
                Err(e) => {
                    debug!(job_id = self.job_id, error = %e, "Job poll failed, retrying next tick");
                }
            }
        }
    }

    /// Apply one snapshot; `Some(true)` when the job is terminal, `None` once
    /// the session is closed
    fn apply(&mut self, core: &SessionCore, job: Job) -> Option<bool> {
        let _gate = core.enter()?;

        let event = {
            let events = Arc::clone(&self.events);
            let store = events.lock();
            self.synthesize(&job, &store)
        };

        let terminal = job.status.is_terminal();
        *self.latest.lock() = Some(job);

        if let Some(event) = event {
            debug!(job_id = self.job_id, step = ?event.step_key, "Synthesized step event");
            self.events.lock().upsert(event.clone(), Position::Append);
            if let Some(on_event) = &self.on_event {
                on_event(&event);
            }
        }

        if terminal {
            core.dispatch(ModeInput::EntityTerminal);
        }
        Some(terminal)
    }
}
