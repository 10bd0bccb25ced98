//! Reconciliation Store
//!
//! Buffers decoded updates and folds them into the visible [`ViewState`].
//!
//! # Architecture
//!
//! ```text
//!   ingestion task                          collaborators
//!   ──────────────                          ─────────────
//!   buffer_transcript ─┐
//!   buffer_note ───────┤  Mutex<Pending>
//!                      ▼
//!   flush_* ──► build next ViewState ──► RwLock<Arc<ViewState>> ──► snapshot()
//!                                    └─► watch::Sender<u64> ─────► subscribe()
//! ```
//!
//! Each flush builds the next view from a copy of the current one and swaps it
//! in under a single write lock, so readers only ever see fully merged
//! batches. Readers clone an `Arc` and never block the writer for longer than
//! the swap.
//!
//! # Buffers
//!
//! Both buffers are kept most-recent-first. The transcript buffer is
//! unbounded until the next flush (updates are never lost); the note buffer
//! drops its oldest unflushed note once it holds `capacity` notes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::messages::{TranscriptMessage, ViewState};
use crate::stats::FeedStats;

/// Default number of visible transcripts and notes
pub const DEFAULT_CAPACITY: usize = 50;

/// Updates waiting for the next flush
#[derive(Debug, Default)]
struct Pending {
    transcripts: VecDeque<TranscriptMessage>,
    notes: VecDeque<String>,
    last_transcript_flush: Option<Instant>,
    last_note_flush: Option<Instant>,
}

/// Buffered merge engine behind the visible transcript state
#[derive(Debug)]
pub struct TranscriptStore {
    capacity: usize,
    pending: Mutex<Pending>,
    view: RwLock<Arc<ViewState>>,
    changes: watch::Sender<u64>,
    stats: Arc<FeedStats>,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Arc::new(FeedStats::new()))
    }
}

impl TranscriptStore {
    /// Create an empty store keeping at most `capacity` entries per channel
    #[must_use]
    pub fn new(capacity: usize, stats: Arc<FeedStats>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            capacity: capacity.max(1),
            pending: Mutex::new(Pending::default()),
            view: RwLock::new(Arc::new(ViewState::default())),
            changes,
            stats,
        }
    }

    /// Maximum number of visible entries per channel
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shared statistics
    #[must_use]
    pub fn stats(&self) -> &Arc<FeedStats> {
        &self.stats
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Prepare for a new ingestion run
    ///
    /// Drops anything still buffered and resets both flush timestamps so the
    /// first update of the run is shown immediately. Visible state is kept.
    pub fn init(&self) {
        *self.pending.lock() = Pending::default();
    }

    /// Flush everything still buffered at the end of an ingestion run
    pub fn teardown(&self) {
        self.flush_all(Instant::now());
    }

    /// Drop buffered updates and all visible state
    pub fn clear(&self) {
        let mut pending = self.pending.lock();
        *pending = Pending::default();

        let mut view = self.view.write();
        if view.is_empty() {
            return;
        }
        let version = view.version + 1;
        *view = Arc::new(ViewState {
            version,
            ..ViewState::default()
        });
        drop(view);
        self.changes.send_replace(version);
    }

    // ========================================================================
    // Buffering
    // ========================================================================

    /// Buffer a transcript update
    pub fn buffer_transcript(&self, message: TranscriptMessage) {
        self.pending.lock().transcripts.push_front(message);
    }

    /// Buffer an assistant note, dropping the oldest unflushed note when full
    pub fn buffer_note(&self, note: String) {
        let mut pending = self.pending.lock();
        if pending.notes.len() >= self.capacity {
            pending.notes.pop_back();
            self.stats.notes_dropped.inc();
        }
        pending.notes.push_front(note);
    }

    /// Number of buffered transcript updates
    #[must_use]
    pub fn pending_transcripts(&self) -> usize {
        self.pending.lock().transcripts.len()
    }

    /// Number of buffered assistant notes
    #[must_use]
    pub fn pending_notes(&self) -> usize {
        self.pending.lock().notes.len()
    }

    /// When transcripts were last flushed (`None` before the first flush)
    #[must_use]
    pub fn last_transcript_flush(&self) -> Option<Instant> {
        self.pending.lock().last_transcript_flush
    }

    /// When assistant notes were last flushed (`None` before the first flush)
    #[must_use]
    pub fn last_note_flush(&self) -> Option<Instant> {
        self.pending.lock().last_note_flush
    }

    // ========================================================================
    // Flushing
    // ========================================================================

    /// Fold buffered transcript updates into visible state
    ///
    /// Always clears the buffer and records `now` as the flush time. Returns
    /// whether visible state changed.
    pub fn flush_transcripts(&self, now: Instant) -> bool {
        let mut pending = self.pending.lock();
        pending.last_transcript_flush = Some(now);
        if pending.transcripts.is_empty() {
            return false;
        }
        let batch: Vec<_> = pending.transcripts.drain(..).rev().collect();

        let mut view = self.view.write();
        let mut transcripts = view.transcripts.clone();
        for (id, updates) in group_by_id(batch) {
            if let Some(existing) = transcripts.iter_mut().find(|m| m.id == id) {
                for update in &updates {
                    self.apply(existing, update);
                }
            } else if let Some(inserted) = self.fold_new(updates) {
                transcripts.insert(0, inserted);
            }
        }
        transcripts.truncate(self.capacity);

        if transcripts == view.transcripts {
            return false;
        }
        let next = ViewState {
            transcripts,
            assistant_notes: view.assistant_notes.clone(),
            version: view.version + 1,
        };
        let version = next.version;
        *view = Arc::new(next);
        drop(view);
        drop(pending);

        self.stats.transcript_flushes.inc();
        self.changes.send_replace(version);
        tracing::debug!(version, "Flushed transcripts");
        true
    }

    /// Prepend buffered assistant notes to visible state
    ///
    /// Always clears the buffer and records `now` as the flush time. Returns
    /// whether visible state changed.
    pub fn flush_notes(&self, now: Instant) -> bool {
        let mut pending = self.pending.lock();
        pending.last_note_flush = Some(now);
        if pending.notes.is_empty() {
            return false;
        }
        let batch = std::mem::take(&mut pending.notes);
        let count = batch.len();

        let mut view = self.view.write();
        let mut notes: Vec<String> = batch.into_iter().collect();
        notes.extend(view.assistant_notes.iter().cloned());
        notes.truncate(self.capacity);

        let next = ViewState {
            transcripts: view.transcripts.clone(),
            assistant_notes: notes,
            version: view.version + 1,
        };
        let version = next.version;
        *view = Arc::new(next);
        drop(view);
        drop(pending);

        self.stats.note_flushes.inc();
        self.changes.send_replace(version);
        tracing::debug!(version, count, "Flushed assistant notes");
        true
    }

    /// Flush both channels
    pub fn flush_all(&self, now: Instant) -> bool {
        let transcripts = self.flush_transcripts(now);
        let notes = self.flush_notes(now);
        transcripts || notes
    }

    fn apply(&self, target: &mut TranscriptMessage, update: &TranscriptMessage) {
        if !target.merge(update) {
            self.ignore_unknown(update);
        }
    }

    /// Build a new message from every update for an id not yet visible
    ///
    /// The first update is inserted whatever its status; later ones merge
    /// into it. A translation carried by the last update wins, so a single
    /// batch never shows less than its newest update.
    fn fold_new(&self, updates: Vec<TranscriptMessage>) -> Option<TranscriptMessage> {
        let mut updates = updates.into_iter();
        let mut base = updates.next()?;
        let mut last_translation = None;
        for update in updates {
            if base.merge(&update) {
                last_translation.clone_from(&update.translation);
            } else {
                self.ignore_unknown(&update);
            }
        }
        if last_translation.is_some() {
            base.translation = last_translation;
        }
        Some(base)
    }

    fn ignore_unknown(&self, update: &TranscriptMessage) {
        self.stats.unknown_status_ignored.inc();
        tracing::warn!(
            id = %update.id,
            status = %update.status,
            "Ignoring transcript update with unknown status"
        );
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Current visible state
    #[must_use]
    pub fn snapshot(&self) -> Arc<ViewState> {
        Arc::clone(&self.view.read())
    }

    /// Visible transcripts, newest first
    #[must_use]
    pub fn visible_transcripts(&self) -> Vec<TranscriptMessage> {
        self.snapshot().transcripts.clone()
    }

    /// Visible assistant notes, newest first
    #[must_use]
    pub fn visible_assistant_notes(&self) -> Vec<String> {
        self.snapshot().assistant_notes.clone()
    }

    /// Current view version
    #[must_use]
    pub fn version(&self) -> u64 {
        self.view.read().version
    }

    /// Receive the view version after every change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

/// Group updates by id in order of first appearance, keeping arrival order
/// within each group
fn group_by_id(batch: Vec<TranscriptMessage>) -> Vec<(String, Vec<TranscriptMessage>)> {
    let mut groups: Vec<(String, Vec<TranscriptMessage>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for update in batch {
        if let Some(&slot) = index.get(&update.id) {
            groups[slot].1.push(update);
        } else {
            index.insert(update.id.clone(), groups.len());
            groups.push((update.id.clone(), vec![update]));
        }
    }
    groups
}
