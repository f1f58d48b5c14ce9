// Wire types for the activity and job endpoints
//
// Design Decision: Closed vocabularies (level, job status) are enums that keep
// unknown values instead of failing to decode, so a newer backend never breaks
// an older client mid-stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Shared
// ============================================================================

/// Severity attached to activity entries and job events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
    Other(String),
}

impl From<String> for Level {
    fn from(value: String) -> Self {
        match value.as_str() {
            "info" => Level::Info,
            "success" => Level::Success,
            "warning" => Level::Warning,
            "error" => Level::Error,
            _ => Level::Other(value),
        }
    }
}

impl From<Level> for String {
    fn from(level: Level) -> Self {
        level.to_string()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Info => write!(f, "info"),
            Level::Success => write!(f, "success"),
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
            Level::Other(other) => write!(f, "{}", other),
        }
    }
}

/// Active delivery mechanism of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    Streaming,
    Polling,
    Disconnected,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Streaming => write!(f, "streaming"),
            Self::Polling => write!(f, "polling"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

// ============================================================================
// Activity
// ============================================================================

/// A single entry in the activity feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub event_type: String,
    pub category: String,
    pub level: Level,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_resource_id: Option<i64>,

    pub actor_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,

    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    #[serde(default)]
    pub requires_attention: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }
}

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Continuation cursor, treating an empty string as absent
    pub fn cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref().filter(|c| !c.is_empty())
    }
}

pub type ActivityPage = Page<Activity>;

/// Response of the unread-count endpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnreadCount {
    pub count: u64,
}

/// Filter shared by listing, unread-count and mark-all-read.
///
/// Empty fields do not constrain anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityFilter {
    pub category: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<i64>,
    pub parent_resource_type: Option<String>,
    pub parent_resource_id: Option<i64>,
    pub requires_attention: Option<bool>,
    pub unread_only: bool,
}

impl ActivityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_resource(mut self, resource_type: impl Into<String>, resource_id: i64) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id);
        self
    }

    pub fn with_parent_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: i64,
    ) -> Self {
        self.parent_resource_type = Some(resource_type.into());
        self.parent_resource_id = Some(resource_id);
        self
    }

    pub fn with_requires_attention(mut self, requires_attention: bool) -> Self {
        self.requires_attention = Some(requires_attention);
        self
    }

    pub fn unread_only(mut self) -> Self {
        self.unread_only = true;
        self
    }

    /// Query parameters understood by the backend
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();

        if let Some(category) = non_empty(&self.category) {
            params.push(("category", category.to_string()));
        }
        if let Some(resource_type) = non_empty(&self.resource_type) {
            params.push(("resource_type", resource_type.to_string()));
        }
        if let Some(resource_id) = self.resource_id.filter(|id| *id != 0) {
            params.push(("resource_id", resource_id.to_string()));
        }
        if let Some(parent_type) = non_empty(&self.parent_resource_type) {
            params.push(("parent_resource_type", parent_type.to_string()));
        }
        if let Some(parent_id) = self.parent_resource_id.filter(|id| *id != 0) {
            params.push(("parent_resource_id", parent_id.to_string()));
        }
        if let Some(requires_attention) = self.requires_attention {
            params.push(("requires_attention", requires_attention.to_string()));
        }
        if self.unread_only {
            params.push(("unread_only", "true".to_string()));
        }

        params
    }

    /// Apply the filter locally, mirroring the server-side predicate
    pub fn matches(&self, activity: &Activity) -> bool {
        if let Some(category) = non_empty(&self.category) {
            if activity.category != category {
                return false;
            }
        }
        if let Some(resource_type) = non_empty(&self.resource_type) {
            if activity.resource_type.as_deref() != Some(resource_type) {
                return false;
            }
        }
        if let Some(resource_id) = self.resource_id.filter(|id| *id != 0) {
            if activity.resource_id != Some(resource_id) {
                return false;
            }
        }
        if let Some(parent_type) = non_empty(&self.parent_resource_type) {
            if activity.parent_resource_type.as_deref() != Some(parent_type) {
                return false;
            }
        }
        if let Some(parent_id) = self.parent_resource_id.filter(|id| *id != 0) {
            if activity.parent_resource_id != Some(parent_id) {
                return false;
            }
        }
        if let Some(requires_attention) = self.requires_attention {
            if activity.requires_attention != requires_attention {
                return false;
            }
        }
        if self.unread_only && !activity.is_unread() {
            return false;
        }
        true
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

// ============================================================================
// Jobs
// ============================================================================

/// Lifecycle status of a background job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
    Other(String),
}

impl JobStatus {
    /// No further events are produced once a job is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled | JobStatus::TimedOut
        )
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            "timed_out" => JobStatus::TimedOut,
            _ => JobStatus::Other(value),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::TimedOut => write!(f, "timed_out"),
            JobStatus::Other(other) => write!(f, "{}", other),
        }
    }
}

/// Snapshot of a background job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i64>,
    pub kind: String,
    pub status: JobStatus,
    #[serde(default)]
    pub current_step: String,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Progress event of a job, ordered by `seq`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: i64,
    pub seq: i64,
    pub event_type: String,
    pub level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        self.status.as_ref().is_some_and(JobStatus::is_terminal)
    }
}

/// Request body for creating a job
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateJobRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn activity() -> Activity {
        serde_json::from_value(json!({
            "id": 7,
            "event_type": "job.completed",
            "category": "job",
            "level": "success",
            "resource_type": "job",
            "resource_id": 12,
            "parent_resource_type": "server",
            "parent_resource_id": 3,
            "actor_type": "system",
            "title": "Job completed",
            "requires_attention": true,
            "created_at": "2026-01-05T10:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn test_level_keeps_unknown_values() {
        let level: Level = serde_json::from_value(json!("critical")).unwrap();
        assert_eq!(level, Level::Other("critical".into()));
        assert_eq!(serde_json::to_value(&level).unwrap(), json!("critical"));
        assert_eq!(
            serde_json::from_value::<Level>(json!("warning")).unwrap(),
            Level::Warning
        );
    }

    #[test]
    fn test_terminal_statuses() {
        for status in ["succeeded", "failed", "cancelled", "timed_out"] {
            assert!(JobStatus::from(status.to_string()).is_terminal(), "{status}");
        }
        for status in ["queued", "running", "paused"] {
            assert!(!JobStatus::from(status.to_string()).is_terminal(), "{status}");
        }
    }

    #[test]
    fn test_activity_decodes_optional_fields() {
        let activity = activity();
        assert_eq!(activity.level, Level::Success);
        assert_eq!(activity.parent_resource_id, Some(3));
        assert!(activity.message.is_none());
        assert!(activity.is_unread());
    }

    #[test]
    fn test_filter_query_pairs_skip_empty_fields() {
        let filter = ActivityFilter::new()
            .with_category("job")
            .with_requires_attention(false)
            .unread_only();
        assert_eq!(
            filter.query_pairs(),
            vec![
                ("category", "job".to_string()),
                ("requires_attention", "false".to_string()),
                ("unread_only", "true".to_string()),
            ]
        );

        let empty = ActivityFilter {
            category: Some(String::new()),
            resource_id: Some(0),
            ..Default::default()
        };
        assert!(empty.query_pairs().is_empty());
    }

    #[test]
    fn test_filter_matches_locally() {
        let activity = activity();
        assert!(ActivityFilter::new().matches(&activity));
        assert!(ActivityFilter::new()
            .with_resource("job", 12)
            .with_parent_resource("server", 3)
            .matches(&activity));
        assert!(!ActivityFilter::new().with_category("server").matches(&activity));
        assert!(!ActivityFilter::new()
            .with_requires_attention(false)
            .matches(&activity));

        let mut read = activity.clone();
        read.read_at = Some(Utc::now());
        assert!(!ActivityFilter::new().unread_only().matches(&read));
    }
}
