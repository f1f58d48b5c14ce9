// Activity feed
//
// Design Decision: The feed keeps one newest-first Event Store shared by the
// pager, the live session and the read-state operations; all of them go
// through the same upsert rule.
// Design Decision: Live activity retries push forever with backoff and never
// polls (DegradationPolicy::RetryPush).
// Design Decision: Marking read is optimistic and is not rolled back when the
// confirming request fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::mode::DegradationPolicy;
use crate::pager::{CursorPager, PageRequest, PageSource};
use crate::push::{PushChannel, PushTransport, SseTransport};
use crate::sequence::SequenceTracker;
use crate::session::{
    ErrorCallback, ItemCallback, ModeObserver, SessionCore, SessionHandle, StreamRunner,
};
use crate::store::{EventStore, Position, SharedStore};
use crate::types::{Activity, ActivityFilter, ActivityPage, Page};

/// Named server-sent event carrying one activity record
pub const ACTIVITY_EVENT: &str = "activity";

/// Client-side predicate deciding whether a streamed record is kept
pub type ActivityPredicate = Arc<dyn Fn(&Activity) -> bool + Send + Sync>;

// ============================================================================
// Listing
// ============================================================================

/// Which activity listing to page through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityScope {
    /// `GET /activity` with a filter
    All(ActivityFilter),
    /// `GET /servers/{id}/activity`
    Server(i64),
}

/// Page source over the REST client
#[derive(Debug, Clone)]
pub struct ActivityPages {
    client: ApiClient,
    scope: ActivityScope,
}

impl ActivityPages {
    pub fn new(client: ApiClient, scope: ActivityScope) -> Self {
        Self { client, scope }
    }
}

#[async_trait]
impl PageSource<Activity> for ActivityPages {
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Page<Activity>> {
        match &self.scope {
            ActivityScope::All(filter) => self.client.list_activity(filter, cursor, limit).await,
            ActivityScope::Server(server_id) => {
                self.client
                    .list_server_activity(*server_id, cursor, limit)
                    .await
            }
        }
    }
}

// ============================================================================
// Stream options
// ============================================================================

/// Options of a live activity session
#[derive(Clone, Default)]
pub struct ActivityStreamOptions {
    /// Resume strictly after this id; `None` streams from now
    pub since_id: Option<i64>,
    pub filter: Option<ActivityPredicate>,
    pub on_event: Option<ItemCallback<Activity>>,
    pub on_error: Option<ErrorCallback>,
    pub on_mode: Option<ModeObserver>,
    /// Overrides the configured bound of the feed
    pub max_items: Option<usize>,
}

impl ActivityStreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since_id(mut self, since_id: i64) -> Self {
        self.since_id = Some(since_id);
        self
    }

    pub fn filter(mut self, filter: impl Fn(&Activity) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn on_event(mut self, on_event: impl Fn(&Activity) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(on_event));
        self
    }

    pub fn on_error(
        mut self,
        on_error: impl Fn(&crate::error::TransportError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    pub fn on_mode(
        mut self,
        on_mode: impl Fn(crate::types::ConnectionMode) + Send + Sync + 'static,
    ) -> Self {
        self.on_mode = Some(Arc::new(on_mode));
        self
    }

    pub fn max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }
}

impl std::fmt::Debug for ActivityStreamOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityStreamOptions")
            .field("since_id", &self.since_id)
            .field("filter", &self.filter.is_some())
            .field("max_items", &self.max_items)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Feed
// ============================================================================

/// Activity feed: paged history, live updates, unread count and read state
pub struct ActivityFeed {
    client: ApiClient,
    config: ClientConfig,
    transport: Arc<dyn PushTransport>,
    store: SharedStore<Activity>,
    pager: CursorPager<Activity>,
    unread: AtomicU64,
}

impl ActivityFeed {
    /// Feed streaming over Server-Sent Events
    pub fn new(client: ApiClient, config: &ClientConfig) -> Self {
        let transport: Arc<dyn PushTransport> = Arc::new(SseTransport::activity(client.clone()));
        Self::with_transport(client, config, transport)
    }

    pub fn with_transport(
        client: ApiClient,
        config: &ClientConfig,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        let mut store = EventStore::new();
        store.set_max_items(config.activity_max_items);
        let store = Arc::new(parking_lot::Mutex::new(store));

        Self {
            client,
            config: config.clone(),
            transport,
            pager: CursorPager::new(Arc::clone(&store)),
            store,
            unread: AtomicU64::new(0),
        }
    }

    /// Load one page of `GET /activity`
    pub async fn list(
        &self,
        filter: &ActivityFilter,
        request: &PageRequest,
    ) -> Result<ActivityPage> {
        let source = ActivityPages::new(self.client.clone(), ActivityScope::All(filter.clone()));
        self.pager.fetch(&source, request).await
    }

    /// Load one page of `GET /servers/{id}/activity`
    pub async fn list_server(
        &self,
        server_id: i64,
        request: &PageRequest,
    ) -> Result<ActivityPage> {
        let source = ActivityPages::new(self.client.clone(), ActivityScope::Server(server_id));
        self.pager.fetch(&source, request).await
    }

    pub fn has_more(&self) -> bool {
        self.pager.has_more()
    }

    pub fn next_cursor(&self) -> Option<String> {
        self.pager.next_cursor()
    }

    /// Snapshot of the held records, newest first
    pub fn items(&self) -> Vec<Activity> {
        self.store.lock().snapshot()
    }

    pub fn get(&self, activity_id: i64) -> Option<Activity> {
        self.store.lock().get(&activity_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Start a live session feeding this store.
    ///
    /// `max_items` bounds the store for this session only; without it the
    /// configured `activity_max_items` applies again.
    pub fn stream(&self, options: ActivityStreamOptions) -> SessionHandle {
        self.store
            .lock()
            .set_max_items(options.max_items.or(self.config.activity_max_items));

        let core = SessionCore::new(
            "activity",
            DegradationPolicy::RetryPush,
            self.config.backoff,
            options.on_mode.clone(),
        );

        let store = Arc::clone(&self.store);
        let filter = options.filter.clone();
        let on_event = options.on_event.clone();
        let deliver = move |activity: Activity| {
            if let Some(filter) = &filter {
                if !filter(&activity) {
                    debug!(activity_id = activity.id, "Activity filtered out");
                    return;
                }
            }
            store.lock().upsert(activity.clone(), Position::Prepend);
            if let Some(on_event) = &on_event {
                on_event(&activity);
            }
        };

        let channel = PushChannel::new(Arc::clone(&self.transport), ACTIVITY_EVENT);
        let tracker = SequenceTracker::new(options.since_id.unwrap_or(0));
        let runner = StreamRunner::new(Arc::clone(&core), channel, tracker, deliver)
            .with_error_callback(options.on_error.clone());

        SessionHandle::spawn(core, runner.run())
    }

    // ------------------------------------------------------------------
    // Read state
    // ------------------------------------------------------------------

    /// Last fetched unread count, adjusted by local read operations
    pub fn unread_count(&self) -> u64 {
        self.unread.load(Ordering::SeqCst)
    }

    /// `GET /activity/unread-count`
    pub async fn fetch_unread_count(&self, filter: &ActivityFilter) -> Result<u64> {
        let count = self.client.unread_count(filter).await?;
        self.unread.store(count, Ordering::SeqCst);
        Ok(count)
    }

    /// Mark one record read: locally first, then confirm with the backend
    pub async fn mark_read(&self, activity_id: i64) -> Result<Activity> {
        let now = Utc::now();
        let mut was_unread = false;
        self.store.lock().update_where(
            |activity| activity.id == activity_id,
            |activity| {
                if activity.read_at.is_none() {
                    activity.read_at = Some(now);
                    was_unread = true;
                }
            },
        );
        if was_unread {
            self.decrement_unread();
        }

        let confirmed = self.client.mark_activity_read(activity_id).await?;
        self.store
            .lock()
            .upsert(confirmed.clone(), Position::Append);
        Ok(confirmed)
    }

    /// Mark every held record matching `filter` read, confirm, then refresh
    /// the unread count
    pub async fn mark_all_read(&self, filter: &ActivityFilter) -> Result<()> {
        let now = Utc::now();
        let changed = self.store.lock().update_where(
            |activity| activity.is_unread() && filter.matches(activity),
            |activity| activity.read_at = Some(now),
        );
        debug!(changed, "Marked activity read locally");

        self.client.mark_all_activity_read(filter).await?;
        self.fetch_unread_count(filter).await?;
        Ok(())
    }

    fn decrement_unread(&self) {
        let _ = self
            .unread
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

impl std::fmt::Debug for ActivityFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityFeed")
            .field("items", &self.len())
            .field("next_cursor", &self.next_cursor())
            .field("unread", &self.unread_count())
            .finish()
    }
}
