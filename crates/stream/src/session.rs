// Delivery session runtime
//
// Design Decision: A session is one background task plus a shared core. Every
// continuation (push item, reconnect timer, poll tick) enters the core's gate
// and checks the closed latch before it touches stores or callbacks, so
// nothing is applied once dispose has returned.
// Design Decision: The gate is reentrant; a callback may dispose the session
// it is running in.
// Design Decision: Shutdown is a watch channel observed with tokio::select!,
// like the worker pollers; the task is also aborted on dispose.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::TransportError;
use crate::mode::{DegradationPolicy, Directive, ModeController, ModeInput};
use crate::poll::PollFallback;
use crate::push::PushChannel;
use crate::sequence::SequenceTracker;
use crate::store::StreamItem;
use crate::types::ConnectionMode;

/// Called on every mode change
pub type ModeObserver = Arc<dyn Fn(ConnectionMode) + Send + Sync>;

/// Called for each item applied to a store
pub type ItemCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Called when the push transport fails
pub type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// How a session task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    Disposed,
    /// A pushed event carried a terminal status
    TerminalEvent,
    /// A polled snapshot carried a terminal status
    TerminalSnapshot,
}

// ============================================================================
// Core
// ============================================================================

pub(crate) struct SessionCore {
    label: String,
    gate: ReentrantMutex<()>,
    controller: Mutex<ModeController>,
    mode_tx: watch::Sender<ConnectionMode>,
    observer: Option<ModeObserver>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCore {
    pub(crate) fn new(
        label: impl Into<String>,
        policy: DegradationPolicy,
        backoff: BackoffPolicy,
        observer: Option<ModeObserver>,
    ) -> Arc<Self> {
        let controller = ModeController::new(policy, backoff);
        let (mode_tx, _) = watch::channel(controller.mode());
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            label: label.into(),
            gate: ReentrantMutex::new(()),
            controller: Mutex::new(controller),
            mode_tx,
            observer,
            shutdown_tx,
            task: Mutex::new(None),
        })
    }

    /// Enter the gate; `None` once the session is closed
    pub(crate) fn enter(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        let guard = self.gate.lock();
        if self.is_closed() {
            return None;
        }
        Some(guard)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.controller.lock().is_closed()
    }

    pub(crate) fn mode(&self) -> ConnectionMode {
        self.controller.lock().mode()
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Feed an input to the mode controller; callers hold the gate
    pub(crate) fn dispatch(&self, input: ModeInput) -> Directive {
        let (directive, before, after) = {
            let mut controller = self.controller.lock();
            let before = controller.mode();
            let directive = controller.handle(input);
            (directive, before, controller.mode())
        };

        if before != after {
            self.notify(after);
        }
        directive
    }

    fn notify(&self, mode: ConnectionMode) {
        info!(session = %self.label, mode = %mode, "Connection mode changed");
        self.mode_tx.send_replace(mode);
        if let Some(observer) = &self.observer {
            observer(mode);
        }
    }

    fn dispose(&self) {
        let _gate = self.gate.lock();

        let was = {
            let mut controller = self.controller.lock();
            if controller.is_closed() {
                return;
            }
            let was = controller.mode();
            controller.handle(ModeInput::Disposed);
            was
        };

        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        if was != ConnectionMode::Disconnected {
            self.notify(ConnectionMode::Disconnected);
        }
        debug!(session = %self.label, "Session disposed");
    }
}

/// Resolves once the shutdown signal is raised (or its sender is gone)
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow();
        if stop {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `delay`; false if the session shut down first
async fn sleep_unless_cancelled(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = cancelled(shutdown) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Owner's handle on a running delivery session.
///
/// Dropping the handle disposes the session.
#[must_use = "dropping the handle disposes the session"]
pub struct SessionHandle {
    core: Arc<SessionCore>,
}

impl SessionHandle {
    pub(crate) fn spawn<F>(core: Arc<SessionCore>, run: F) -> Self
    where
        F: Future<Output = SessionEnd> + Send + 'static,
    {
        // Observers learn the starting mode before any event arrives
        core.notify(core.mode());

        let label = core.label().to_string();
        let task = tokio::spawn(async move {
            let end = run.await;
            debug!(session = %label, end = ?end, "Session task finished");
        });

        {
            let mut slot = core.task.lock();
            *slot = Some(task);
        }
        // Disposed from a callback before the task handle was stored
        if core.is_closed() {
            if let Some(task) = core.task.lock().take() {
                task.abort();
            }
        }

        Self { core }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.core.mode()
    }

    /// Watch mode changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionMode> {
        self.core.mode_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Resolves once the session is disconnected, by dispose or because the
    /// watched entity finished
    pub async fn disconnected(&self) {
        let mut modes = self.subscribe();
        let _ = modes
            .wait_for(|mode| *mode == ConnectionMode::Disconnected)
            .await;
    }

    /// A clonable disposer that does not keep the session alive
    pub fn disposer(&self) -> Disposer {
        Disposer {
            core: Arc::downgrade(&self.core),
        }
    }

    /// Stop delivery. Idempotent; safe to call from inside a callback.
    pub fn dispose(&self) {
        self.core.dispose();
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session", &self.core.label)
            .field("mode", &self.mode())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Disposes a session from wherever it was handed to
#[derive(Clone)]
pub struct Disposer {
    core: Weak<SessionCore>,
}

impl Disposer {
    pub fn dispose(&self) {
        if let Some(core) = self.core.upgrade() {
            core.dispose();
        }
    }
}

// ============================================================================
// Push runner
// ============================================================================

enum Applied {
    Continue,
    Terminal,
    Closed,
}

/// Drives the push channel of one session: open, apply, reconnect or hand
/// over to polling, as the mode controller directs.
pub(crate) struct StreamRunner<T> {
    core: Arc<SessionCore>,
    channel: PushChannel<T>,
    tracker: SequenceTracker,
    deliver: Box<dyn FnMut(T) + Send>,
    on_error: Option<ErrorCallback>,
    fallback: Option<PollFallback>,
    shutdown: watch::Receiver<bool>,
}

impl<T> StreamRunner<T>
where
    T: StreamItem + DeserializeOwned,
{
    /// `deliver` runs inside the gate for every parsed item
    pub(crate) fn new(
        core: Arc<SessionCore>,
        channel: PushChannel<T>,
        tracker: SequenceTracker,
        deliver: impl FnMut(T) + Send + 'static,
    ) -> Self {
        let shutdown = core.shutdown_signal();
        Self {
            core,
            channel,
            tracker,
            deliver: Box::new(deliver),
            on_error: None,
            fallback: None,
            shutdown,
        }
    }

    pub(crate) fn with_error_callback(mut self, on_error: Option<ErrorCallback>) -> Self {
        self.on_error = on_error;
        self
    }

    pub(crate) fn with_fallback(mut self, fallback: PollFallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub(crate) async fn run(mut self) -> SessionEnd {
        loop {
            let error = match self.stream_once().await {
                Ok(end) => return end,
                Err(error) => error,
            };

            let Some(directive) = self.record_failure(&error) else {
                return SessionEnd::Disposed;
            };

            match directive {
                Directive::Reconnect { after } => {
                    info!(
                        session = %self.core.label(),
                        delay_ms = after.as_millis() as u64,
                        resume_from = ?self.tracker.resume_from(),
                        "Reconnecting push channel"
                    );
                    if !sleep_unless_cancelled(&mut self.shutdown, after).await {
                        return SessionEnd::Disposed;
                    }
                }
                Directive::StartPolling => {
                    return match self.fallback.take() {
                        Some(poller) => poller.run(&self.core, &mut self.shutdown).await,
                        None => {
                            warn!(session = %self.core.label(), "No polling fallback configured");
                            SessionEnd::Disposed
                        }
                    };
                }
                Directive::Continue | Directive::Shutdown => return SessionEnd::Disposed,
            }
        }
    }

    /// One connection lifetime; `Err` carries the failure that ended it
    async fn stream_once(&mut self) -> Result<SessionEnd, TransportError> {
        let resume_from = self.tracker.resume_from();
        let opened = tokio::select! {
            _ = cancelled(&mut self.shutdown) => return Ok(SessionEnd::Disposed),
            opened = self.channel.open(resume_from) => opened,
        };
        let mut connection = opened?;

        loop {
            let next = tokio::select! {
                _ = cancelled(&mut self.shutdown) => return Ok(SessionEnd::Disposed),
                next = connection.next() => next,
            };

            match next {
                Some(Ok(item)) => match self.apply(item) {
                    Applied::Continue => {}
                    Applied::Terminal => {
                        connection.close();
                        return Ok(SessionEnd::TerminalEvent);
                    }
                    Applied::Closed => return Ok(SessionEnd::Disposed),
                },
                Some(Err(error)) => return Err(error),
                None => return Err(TransportError::Closed),
            }
        }
    }

    fn apply(&mut self, item: T) -> Applied {
        let Some(_gate) = self.core.enter() else {
            return Applied::Closed;
        };

        self.tracker.observe(item.sequence());
        let terminal = item.is_terminal();
        (self.deliver)(item);

        if self.core.dispatch(ModeInput::EventDelivered) == Directive::Shutdown {
            return Applied::Closed;
        }
        if terminal {
            self.core.dispatch(ModeInput::EntityTerminal);
            return Applied::Terminal;
        }
        Applied::Continue
    }

    fn record_failure(&mut self, error: &TransportError) -> Option<Directive> {
        let _gate = self.core.enter()?;

        warn!(session = %self.core.label(), error = %error, "Push connection failed");
        if let Some(on_error) = &self.on_error {
            on_error(error);
        }

        let input = if error.is_unavailable() {
            ModeInput::PushUnavailable
        } else {
            ModeInput::TransportFailed
        };
        Some(self.core.dispatch(input))
    }
}
