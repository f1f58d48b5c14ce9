// Resilient event delivery
//
// This crate keeps a local, ordered view of server-produced events (activity
// records, background job progress) current over an unreliable push channel.
//
// Key design decisions:
// - A push transport yields a lazy stream of raw messages; parsing happens in
//   the channel, reconnect policy in the session, never in the transport
// - Every live session is an explicit object with a one-way closed latch and a
//   single idempotent disposer
// - Degradation is declared per stream kind (activity retries push, job events
//   fall back to polling)
// - Stores deduplicate by identity and update in place, so at-least-once
//   delivery is absorbed rather than prevented
// - REST failures surface to the caller and are never retried here

// Building blocks
pub mod backoff;
pub mod mode;
pub mod sequence;
pub mod store;

// Transports
pub mod pager;
pub mod poll;
pub mod push;
pub mod session;

// REST boundary and configuration
pub mod client;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;

// Call sites
pub mod activity;
pub mod jobs;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use activity::{ActivityFeed, ActivityPages, ActivityScope, ActivityStreamOptions};
pub use backoff::{Backoff, BackoffPolicy};
pub use client::ApiClient;
pub use config::ClientConfig;
pub use error::{ApiError, ConfigError, Result, TransportError};
pub use jobs::{JobWatchOptions, JobWatcher};
pub use mode::{DegradationPolicy, Directive, ModeController, ModeInput};
pub use pager::{CursorPager, PageRequest, PageSource};
pub use poll::{JobSource, PollFallback};
pub use push::{PushChannel, PushConnection, PushTransport, RawMessage, SseTransport};
pub use sequence::SequenceTracker;
pub use session::{Disposer, SessionHandle};
pub use store::{EventStore, Position, SharedStore, StreamItem, Upserted};
pub use telemetry::{init_telemetry, TelemetryConfig};
pub use types::{
    Activity, ActivityFilter, ActivityPage, ConnectionMode, CreateJobRequest, Job, JobEvent,
    JobStatus, Level, Page,
};
