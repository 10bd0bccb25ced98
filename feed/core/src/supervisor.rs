//! Reconnect Supervisor
//!
//! Keeps the feed logically open until it is explicitly stopped.
//!
//! # State Machine
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!                 ▼                                          │
//!   Idle ──► Connecting ──► Streaming ──┬──► Completed ──► Waiting (graceful backoff)
//!                 │                     │                    ▲
//!                 └─────────────────────┴──► Failed ─────────┘ (error backoff)
//!                                                │
//!                                                └──► Stopped  (ErrorAction::Stop)
//!
//!   any state ── cancel ──► Stopped
//! ```
//!
//! Sessions run one after another on the supervisor task, so at most one is
//! ever live. Updates left buffered when a session ends are flushed before the
//! next one starts. While streaming, a local tick applies the heartbeat flush
//! policy so buffered updates surface even if the server sends no keepalives.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::messages::RawEvent;
use crate::scheduler::Dispatcher;
use crate::session::{EventSink, EventSource, SessionOutcome};
use crate::stats::FeedStats;

// ============================================================================
// State
// ============================================================================

/// Observable supervisor state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    /// Not started
    #[default]
    Idle,
    /// Opening a session
    Connecting,
    /// A session is delivering events
    Streaming,
    /// The last session was closed by the server
    Completed,
    /// The last session failed
    Failed,
    /// Waiting out a backoff before reconnecting
    Waiting,
    /// Stopped for good
    Stopped,
}

impl SupervisorState {
    /// Whether the supervisor has stopped
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Waiting => "waiting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What to do after a session failed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorAction {
    /// Wait the error backoff and reconnect
    #[default]
    Retry,
    /// Stop the supervisor
    Stop,
}

/// Callback consulted after every failed session
pub type ErrorCallback = Arc<dyn Fn(&FeedError) -> ErrorAction + Send + Sync>;

// ============================================================================
// Settings
// ============================================================================

/// Timing settings for the supervisor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Delay after a failed session
    pub error_backoff: Duration,
    /// Delay after the server closed the stream
    pub graceful_backoff: Duration,
    /// Period of the local flush tick while streaming (`None` disables it)
    pub local_tick: Option<Duration>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&FeedConfig::default())
    }
}

impl From<&FeedConfig> for SupervisorSettings {
    fn from(config: &FeedConfig) -> Self {
        Self {
            error_backoff: config.error_backoff,
            graceful_backoff: config.graceful_backoff,
            local_tick: config.local_tick_period(),
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Runs sessions back to back with backoff until cancelled
pub struct Supervisor {
    source: Arc<dyn EventSource>,
    dispatcher: Dispatcher,
    settings: SupervisorSettings,
    on_error: ErrorCallback,
    state: Arc<watch::Sender<SupervisorState>>,
    stats: Arc<FeedStats>,
}

impl Supervisor {
    /// Create a supervisor that retries every failure
    pub fn new(
        source: Arc<dyn EventSource>,
        dispatcher: Dispatcher,
        settings: SupervisorSettings,
    ) -> Self {
        let stats = Arc::clone(dispatcher.store().stats());
        let (state, _) = watch::channel(SupervisorState::Idle);
        let state = Arc::new(state);
        Self {
            source,
            dispatcher,
            settings,
            on_error: Arc::new(|_| ErrorAction::Retry),
            state,
            stats,
        }
    }

    /// Consult `callback` after every failed session
    #[must_use]
    pub fn with_error_callback(mut self, callback: ErrorCallback) -> Self {
        self.on_error = callback;
        self
    }

    /// Publish state changes on `state` instead of a private channel
    #[must_use]
    pub fn with_state_channel(mut self, state: Arc<watch::Sender<SupervisorState>>) -> Self {
        self.state = state;
        self
    }

    /// Watch the supervisor state
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Run until `cancel` fires or the error callback asks to stop
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(endpoint = self.source.endpoint(), "Feed supervisor started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(SupervisorState::Connecting);
            self.stats.sessions_started.inc();
            tracing::info!(endpoint = self.source.endpoint(), "Connecting to feed");

            let outcome = self.run_session(&cancel).await;

            // Flush whatever the finished session left buffered
            self.dispatcher.store().flush_all(Instant::now());

            let backoff = match outcome {
                SessionOutcome::Completed => {
                    self.set_state(SupervisorState::Completed);
                    self.stats.graceful_closes.inc();
                    tracing::info!(
                        backoff_ms = duration_ms(self.settings.graceful_backoff),
                        "Feed closed by server, reconnecting after backoff"
                    );
                    self.settings.graceful_backoff
                }
                SessionOutcome::Failed(error) => {
                    self.set_state(SupervisorState::Failed);
                    self.stats.transport_failures.inc();
                    tracing::warn!(
                        error = %error,
                        backoff_ms = duration_ms(self.settings.error_backoff),
                        "Feed session failed"
                    );
                    if (self.on_error)(&error) == ErrorAction::Stop {
                        tracing::info!("Error callback requested stop");
                        break;
                    }
                    self.settings.error_backoff
                }
                SessionOutcome::Cancelled => break,
            };

            self.set_state(SupervisorState::Waiting);
            if !wait_before_retry(backoff, &cancel).await {
                break;
            }
        }

        self.set_state(SupervisorState::Stopped);
        tracing::info!("Feed supervisor stopped");
    }

    async fn run_session(&self, cancel: &CancellationToken) -> SessionOutcome {
        let mut sink = DispatchSink {
            dispatcher: &self.dispatcher,
            state: &self.state,
            stats: &self.stats,
        };
        let mut session = self.source.run(cancel, &mut sink);

        let Some(period) = self.settings.local_tick else {
            return session.await;
        };

        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                outcome = &mut session => return outcome,
                _ = ticker.tick() => {
                    self.dispatcher.tick();
                }
            }
        }
    }

    fn set_state(&self, next: SupervisorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Supervisor state changed");
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("endpoint", &self.source.endpoint())
            .field("settings", &self.settings)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Sleep for the reconnect backoff unless cancelled first
///
/// Returns `false` if cancelled.
async fn wait_before_retry(backoff: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(backoff) => true,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Routes session callbacks into the dispatcher and stats
struct DispatchSink<'a> {
    dispatcher: &'a Dispatcher,
    state: &'a watch::Sender<SupervisorState>,
    stats: &'a FeedStats,
}

impl EventSink for DispatchSink<'_> {
    fn on_open(&mut self) {
        self.state.send_replace(SupervisorState::Streaming);
        tracing::info!("Feed streaming");
    }

    fn on_event(&mut self, event: RawEvent) {
        self.stats.frames_decoded.inc();
        self.dispatcher.dispatch(event);
    }

    fn on_decode_error(&mut self, _error: &FeedError) {
        self.stats.decode_errors.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::TranscriptMessage;
    use crate::scheduler::DEFAULT_FLUSH_INTERVAL;
    use crate::store::TranscriptStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One scripted session
    enum Step {
        Fail,
        Complete(Vec<RawEvent>),
        /// Deliver events, then stay open until cancelled
        Hold(Vec<RawEvent>),
    }

    #[derive(Default)]
    struct ScriptedSource {
        steps: Mutex<VecDeque<Step>>,
        attempts: Mutex<Vec<Instant>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                ..Default::default()
            })
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().clone()
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn run(
            &self,
            cancel: &CancellationToken,
            sink: &mut dyn EventSink,
        ) -> SessionOutcome {
            self.attempts.lock().push(Instant::now());
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);

            let step = self.steps.lock().pop_front().unwrap_or(Step::Hold(vec![]));
            let outcome = match step {
                Step::Fail => SessionOutcome::Failed(FeedError::Transport("refused".into())),
                Step::Complete(events) => {
                    sink.on_open();
                    events.into_iter().for_each(|e| sink.on_event(e));
                    SessionOutcome::Completed
                }
                Step::Hold(events) => {
                    sink.on_open();
                    events.into_iter().for_each(|e| sink.on_event(e));
                    cancel.cancelled().await;
                    SessionOutcome::Cancelled
                }
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            outcome
        }

        fn endpoint(&self) -> &str {
            "scripted"
        }
    }

    fn supervisor(source: Arc<ScriptedSource>, local_tick: Option<Duration>) -> Supervisor {
        let store = Arc::new(TranscriptStore::default());
        let dispatcher = Dispatcher::new(store, DEFAULT_FLUSH_INTERVAL);
        Supervisor::new(
            source,
            dispatcher,
            SupervisorSettings {
                local_tick,
                ..SupervisorSettings::default()
            },
        )
    }

    fn transcript(id: &str, status: &str, text: &str) -> RawEvent {
        RawEvent::Transcript(TranscriptMessage::new(id, status, text))
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_after_error_then_graceful_close() {
        let source = ScriptedSource::new(vec![Step::Fail, Step::Complete(vec![])]);
        let supervisor = supervisor(Arc::clone(&source), None);
        let state = supervisor.subscribe_state();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(20)).await;

        let attempts = source.attempts();
        assert_eq!(attempts.len(), 3);
        let first_gap = attempts[1] - attempts[0];
        let second_gap = attempts[2] - attempts[1];
        assert!(first_gap >= Duration::from_secs(5) && first_gap < Duration::from_secs(6));
        assert!(second_gap >= Duration::from_secs(10) && second_gap < Duration::from_secs(11));
        assert_eq!(source.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(*state.borrow(), SupervisorState::Streaming);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(*state.borrow(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_callback_can_stop() {
        let source = ScriptedSource::new(vec![Step::Fail]);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let supervisor = supervisor(Arc::clone(&source), None).with_error_callback(Arc::new(
            move |error| {
                assert!(!error.is_cancelled());
                counter.fetch_add(1, Ordering::SeqCst);
                ErrorAction::Stop
            },
        ));
        let stats = Arc::clone(&supervisor.stats);
        let state = supervisor.subscribe_state();

        supervisor.run(CancellationToken::new()).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(source.attempts().len(), 1);
        assert_eq!(stats.transport_failures.get(), 1);
        assert_eq!(*state.borrow(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_is_prompt() {
        let source = ScriptedSource::new(vec![Step::Fail]);
        let supervisor = supervisor(Arc::clone(&source), None);
        let mut state = supervisor.subscribe_state();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(cancel.clone()));

        state
            .wait_for(|s| *s == SupervisorState::Waiting)
            .await
            .unwrap();
        let started = Instant::now();
        cancel.cancel();
        handle.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(source.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_updates_flushed_between_sessions() {
        let source = ScriptedSource::new(vec![Step::Complete(vec![
            transcript("a", "partial", "he"),
            transcript("a", "fulltext", "hello"),
        ])]);
        let supervisor = supervisor(Arc::clone(&source), None);
        let store = Arc::clone(supervisor.dispatcher.store());
        let mut state = supervisor.subscribe_state();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(cancel.clone()));

        state
            .wait_for(|s| *s == SupervisorState::Waiting)
            .await
            .unwrap();
        assert_eq!(
            store.visible_transcripts(),
            vec![TranscriptMessage::new("a", "fulltext", "hello")]
        );
        assert_eq!(store.stats().frames_decoded.get(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_tick_flushes_without_server_heartbeat() {
        let source = ScriptedSource::new(vec![Step::Hold(vec![
            transcript("a", "partial", "he"),
            transcript("a", "fulltext", "hello"),
        ])]);
        let supervisor = supervisor(Arc::clone(&source), Some(DEFAULT_FLUSH_INTERVAL * 2));
        let store = Arc::clone(supervisor.dispatcher.store());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.visible_transcripts()[0].text, "he");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.visible_transcripts()[0].text, "hello");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = FeedConfig::default();
        config.local_tick = false;
        let settings = SupervisorSettings::from(&config);
        assert_eq!(settings.error_backoff, Duration::from_secs(5));
        assert_eq!(settings.graceful_backoff, Duration::from_secs(10));
        assert_eq!(settings.local_tick, None);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SupervisorState::Waiting.to_string(), "waiting");
        assert!(SupervisorState::Stopped.is_terminal());
        assert!(!SupervisorState::Idle.is_terminal());
    }
}
