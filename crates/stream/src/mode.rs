//! Delivery mode state machine
//!
//! ```text
//! ┌───────────┐  transport failure (FallbackToPolling)  ┌─────────┐
//! │ Streaming │ ──────────────────────────────────────► │ Polling │
//! └───────────┘                                         └─────────┘
//!   │   ▲  transport failure (RetryPush):                    │
//!   │   └─ reconnect after backoff, mode unchanged           │ entity terminal
//!   │                                                        ▼
//!   │  entity terminal / dispose                     ┌──────────────┐
//!   └──────────────────────────────────────────────► │ Disconnected │
//!                                                    └──────────────┘
//! ```
//!
//! The controller is pure: it decides, the session runtime acts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::types::ConnectionMode;

/// How a stream kind degrades when push fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationPolicy {
    /// Keep retrying the push channel with backoff; never poll
    RetryPush,
    /// Give up on push after the first failure and poll until terminal
    FallbackToPolling,
}

/// Inputs observed by the session runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeInput {
    /// A push payload was parsed and applied
    EventDelivered,
    /// The push connection failed or was closed
    TransportFailed,
    /// The push mechanism is unavailable in this environment
    PushUnavailable,
    /// The watched entity reached a terminal status
    EntityTerminal,
    /// The owner disposed the session
    Disposed,
}

/// What the runtime must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Reconnect { after: Duration },
    StartPolling,
    Shutdown,
}

/// Mode state of one session, including its backoff and closed latch
#[derive(Debug, Clone)]
pub struct ModeController {
    mode: ConnectionMode,
    policy: DegradationPolicy,
    backoff: Backoff,
    closed: bool,
}

impl ModeController {
    /// Sessions start by attempting to stream
    pub fn new(policy: DegradationPolicy, backoff: BackoffPolicy) -> Self {
        Self {
            mode: ConnectionMode::Streaming,
            policy,
            backoff: Backoff::new(backoff),
            closed: false,
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn policy(&self) -> DegradationPolicy {
        self.policy
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn retry_count(&self) -> u32 {
        self.backoff.retry_count()
    }

    pub fn handle(&mut self, input: ModeInput) -> Directive {
        if self.closed {
            return Directive::Shutdown;
        }

        if input == ModeInput::Disposed {
            self.closed = true;
            self.mode = ConnectionMode::Disconnected;
            return Directive::Shutdown;
        }

        match (self.mode, input) {
            (ConnectionMode::Disconnected, _) => Directive::Shutdown,

            (_, ModeInput::EntityTerminal) => {
                self.mode = ConnectionMode::Disconnected;
                Directive::Shutdown
            }

            (ConnectionMode::Streaming, ModeInput::EventDelivered) => {
                self.backoff.reset();
                Directive::Continue
            }

            (
                ConnectionMode::Streaming,
                ModeInput::TransportFailed | ModeInput::PushUnavailable,
            ) => match self.policy {
                DegradationPolicy::RetryPush => Directive::Reconnect {
                    after: self.backoff.next_delay(),
                },
                DegradationPolicy::FallbackToPolling => {
                    self.mode = ConnectionMode::Polling;
                    Directive::StartPolling
                }
            },

            // Polling owns the session until the entity is terminal
            (ConnectionMode::Polling, _) => Directive::Continue,

            (_, ModeInput::Disposed) => Directive::Shutdown,
        }
    }
}
