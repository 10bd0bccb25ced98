//! Transcript Feed
//!
//! Public handle tying the pieces together. One feed owns one ingestion task
//! at a time; the store it writes into is shared with whoever reads the view.
//!
//! ```text
//!   TranscriptFeed::start ──► spawn Supervisor::run ──► EventSource sessions
//!                                   │
//!                                   ▼
//!                              Dispatcher ──► TranscriptStore ◄── visible_*()
//!                                                   │               snapshot()
//!                                                   └──► subscribe()
//! ```
//!
//! Visible state survives `stop`, so a restarted feed keeps showing what it
//! had; call [`TranscriptFeed::clear`] to drop it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::messages::{TranscriptMessage, ViewState};
use crate::scheduler::Dispatcher;
use crate::session::{EventSource, HttpEventSource};
use crate::stats::{FeedStats, StatsSnapshot};
use crate::store::TranscriptStore;
use crate::supervisor::{ErrorAction, ErrorCallback, Supervisor, SupervisorSettings, SupervisorState};

/// A running ingestion task
struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Handle to a resilient transcript feed
pub struct TranscriptFeed {
    config: FeedConfig,
    source: Arc<dyn EventSource>,
    store: Arc<TranscriptStore>,
    state: Arc<watch::Sender<SupervisorState>>,
    on_error: ErrorCallback,
    running: Mutex<Option<Running>>,
}

impl TranscriptFeed {
    /// Create a feed reading from the configured HTTP endpoint
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: FeedConfig) -> Result<Self, FeedError> {
        let source = HttpEventSource::new(&config)?;
        Ok(Self::with_source(config, Arc::new(source)))
    }

    /// Create a feed reading from `source`
    #[must_use]
    pub fn with_source(config: FeedConfig, source: Arc<dyn EventSource>) -> Self {
        let store = Arc::new(TranscriptStore::new(
            config.capacity,
            Arc::new(FeedStats::new()),
        ));
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            config,
            source,
            store,
            state: Arc::new(state),
            on_error: Arc::new(|_| ErrorAction::Retry),
            running: Mutex::new(None),
        }
    }

    /// Write into an existing store instead of a private one
    #[must_use]
    pub fn with_store(mut self, store: Arc<TranscriptStore>) -> Self {
        self.store = store;
        self
    }

    /// Consult `callback` after every failed session
    #[must_use]
    pub fn with_error_callback(
        mut self,
        callback: impl Fn(&FeedError) -> ErrorAction + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Arc::new(callback);
        self
    }

    /// Configuration this feed was built from
    #[must_use]
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// The store behind the visible state
    #[must_use]
    pub fn store(&self) -> &Arc<TranscriptStore> {
        &self.store
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start ingesting in the background
    ///
    /// Returns `false` without doing anything if the feed is already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        self.store.init();
        let dispatcher = Dispatcher::new(Arc::clone(&self.store), self.config.flush_interval);
        let supervisor = Supervisor::new(
            Arc::clone(&self.source),
            dispatcher,
            SupervisorSettings::from(&self.config),
        )
        .with_error_callback(Arc::clone(&self.on_error))
        .with_state_channel(Arc::clone(&self.state));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(cancel.clone()));
        *running = Some(Running { cancel, handle });

        tracing::info!(url = %self.config.url, "Transcript feed started");
        true
    }

    /// Stop ingesting and flush anything still buffered
    ///
    /// Waits for the ingestion task to finish. Calling this on a stopped
    /// feed only flushes.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { cancel, handle }) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Feed task ended abnormally");
            }
            tracing::info!("Transcript feed stopped");
        }
        self.store.teardown();
    }

    /// Whether an ingestion task is live
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Visible transcripts, newest first
    #[must_use]
    pub fn visible_transcripts(&self) -> Vec<TranscriptMessage> {
        self.store.visible_transcripts()
    }

    /// Visible assistant notes, newest first
    #[must_use]
    pub fn visible_assistant_notes(&self) -> Vec<String> {
        self.store.visible_assistant_notes()
    }

    /// Current visible state
    #[must_use]
    pub fn snapshot(&self) -> Arc<ViewState> {
        self.store.snapshot()
    }

    /// Receive the view version after every change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    /// Current supervisor state
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Watch supervisor state changes
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.store.stats().snapshot()
    }

    /// Drop all buffered and visible state
    pub fn clear(&self) {
        self.store.clear();
    }
}

impl Drop for TranscriptFeed {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for TranscriptFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptFeed")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
