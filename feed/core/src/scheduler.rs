//! Dispatch Scheduler
//!
//! Decides, per decoded event, whether buffered updates become visible now or
//! wait for a later event.
//!
//! ```text
//!   Transcript ─► buffer ─► elapsed >= interval ? flush transcripts
//!   Note       ─► buffer ─► elapsed >= interval ? flush notes
//!   Heartbeat  ─────────► elapsed >= 2 × interval ? flush (per channel)
//! ```
//!
//! A channel that has never flushed is always due, so the first update after
//! [`TranscriptStore::init`] is shown immediately. A heartbeat flush of an
//! empty buffer only advances that channel's timestamp.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::messages::RawEvent;
use crate::store::TranscriptStore;

/// Default minimum time between flushes of one channel
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(200);

/// Which channels a dispatch flushed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// The transcript buffer was flushed
    pub transcripts: bool,
    /// The assistant note buffer was flushed
    pub notes: bool,
}

impl FlushReport {
    /// Whether any channel was flushed
    #[must_use]
    pub fn any(&self) -> bool {
        self.transcripts || self.notes
    }
}

/// Routes decoded events into the store and applies the flush policy
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<TranscriptStore>,
    interval: Duration,
}

impl Dispatcher {
    /// Create a dispatcher flushing at most once per `interval` per channel
    #[must_use]
    pub fn new(store: Arc<TranscriptStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Flush interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The store events are dispatched into
    #[must_use]
    pub fn store(&self) -> &Arc<TranscriptStore> {
        &self.store
    }

    /// Dispatch one event observed at `now`
    pub fn dispatch_at(&self, event: RawEvent, now: Instant) -> FlushReport {
        match event {
            RawEvent::Transcript(message) => {
                self.store.buffer_transcript(message);
                let due = is_due(self.store.last_transcript_flush(), now, self.interval);
                if due {
                    self.store.flush_transcripts(now);
                }
                FlushReport {
                    transcripts: due,
                    notes: false,
                }
            }
            RawEvent::AssistantNote(note) => {
                self.store.buffer_note(note);
                let due = is_due(self.store.last_note_flush(), now, self.interval);
                if due {
                    self.store.flush_notes(now);
                }
                FlushReport {
                    transcripts: false,
                    notes: due,
                }
            }
            RawEvent::Heartbeat => self.tick_at(now),
        }
    }

    /// Dispatch one event observed now
    pub fn dispatch(&self, event: RawEvent) -> FlushReport {
        self.dispatch_at(event, Instant::now())
    }

    /// Apply the heartbeat policy at `now`
    pub fn tick_at(&self, now: Instant) -> FlushReport {
        let threshold = self.interval * 2;
        let mut report = FlushReport::default();

        if is_due(self.store.last_transcript_flush(), now, threshold) {
            self.store.flush_transcripts(now);
            report.transcripts = true;
        }
        if is_due(self.store.last_note_flush(), now, threshold) {
            self.store.flush_notes(now);
            report.notes = true;
        }

        if report.any() {
            tracing::trace!(?report, "Heartbeat flush");
        }
        report
    }

    /// Apply the heartbeat policy now
    pub fn tick(&self) -> FlushReport {
        self.tick_at(Instant::now())
    }
}

fn is_due(last: Option<Instant>, now: Instant, threshold: Duration) -> bool {
    match last {
        Some(last) => now.saturating_duration_since(last) >= threshold,
        None => true,
    }
}
