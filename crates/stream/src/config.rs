// Client configuration
//
// Design Decision: Backoff defaults to 1s base / 30s cap and polling to 2s;
// every value is overridable from the environment.

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;

const DEFAULT_API_URL: &str = "http://localhost:8080/api";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2_000);

/// Configuration shared by the REST client and delivery sessions
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the backend API (without trailing slash)
    pub api_url: String,
    /// Per-request timeout for REST calls; push connections are never timed out
    pub request_timeout: Option<Duration>,
    /// Reconnect policy for push channels
    pub backoff: BackoffPolicy,
    /// Interval of the polling fallback
    pub poll_interval: Duration,
    /// Bound for live activity feeds
    pub activity_max_items: Option<usize>,
    /// User-Agent sent with every request
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: None,
            backoff: BackoffPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            activity_max_items: None,
            user_agent: format!("pressluft-stream/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::default().with_api_url(api_url)
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `PRESSLUFT_API_URL`: API base URL (default: "http://localhost:8080/api")
    /// - `PRESSLUFT_REQUEST_TIMEOUT_MS`: REST request timeout
    /// - `PRESSLUFT_BACKOFF_BASE_MS` / `PRESSLUFT_BACKOFF_CAP_MS`: reconnect backoff
    /// - `PRESSLUFT_POLL_INTERVAL_MS`: polling fallback interval
    /// - `PRESSLUFT_ACTIVITY_MAX_ITEMS`: bound for live activity feeds
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("PRESSLUFT_API_URL") {
            if url.trim().is_empty() {
                return Err(ConfigError::Empty("PRESSLUFT_API_URL"));
            }
            config = config.with_api_url(url);
        }
        if let Some(ms) = parse_millis(&lookup, "PRESSLUFT_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_millis(&lookup, "PRESSLUFT_BACKOFF_BASE_MS")? {
            config.backoff.initial_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_millis(&lookup, "PRESSLUFT_BACKOFF_CAP_MS")? {
            config.backoff.max_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_millis(&lookup, "PRESSLUFT_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(max) = parse_millis(&lookup, "PRESSLUFT_ACTIVITY_MAX_ITEMS")? {
            config.activity_max_items = Some((max as usize).max(1));
        }

        Ok(config)
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_activity_max_items(mut self, max_items: usize) -> Self {
        self.activity_max_items = Some(max_items.max(1));
        self
    }
}

fn parse_millis(
    lookup: &impl Fn(&'static str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
    }
}
