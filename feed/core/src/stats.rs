//! Feed Statistics
//!
//! Lifetime counters shared between the ingestion task and collaborators.
//! Collaborators may surface a rising decode error rate as a warning; nothing
//! here influences ingestion.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// A monotonically increasing counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters for one feed
#[derive(Debug, Default)]
pub struct FeedStats {
    /// Connection attempts made
    pub sessions_started: Counter,
    /// Frames decoded successfully
    pub frames_decoded: Counter,
    /// Frames skipped because they failed to decode
    pub decode_errors: Counter,
    /// Sessions that ended with a transport failure
    pub transport_failures: Counter,
    /// Sessions closed gracefully by the server
    pub graceful_closes: Counter,
    /// Transcript flushes that changed visible state
    pub transcript_flushes: Counter,
    /// Assistant note flushes that changed visible state
    pub note_flushes: Counter,
    /// Transcript updates ignored for an unknown status
    pub unknown_status_ignored: Counter,
    /// Assistant notes dropped from a full buffer before being shown
    pub notes_dropped: Counter,
}

impl FeedStats {
    /// Create zeroed statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of all counters
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_started: self.sessions_started.get(),
            frames_decoded: self.frames_decoded.get(),
            decode_errors: self.decode_errors.get(),
            transport_failures: self.transport_failures.get(),
            graceful_closes: self.graceful_closes.get(),
            transcript_flushes: self.transcript_flushes.get(),
            note_flushes: self.note_flushes.get(),
            unknown_status_ignored: self.unknown_status_ignored.get(),
            notes_dropped: self.notes_dropped.get(),
        }
    }
}

/// Plain copy of [`FeedStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Connection attempts made
    pub sessions_started: u64,
    /// Frames decoded successfully
    pub frames_decoded: u64,
    /// Frames skipped because they failed to decode
    pub decode_errors: u64,
    /// Sessions that ended with a transport failure
    pub transport_failures: u64,
    /// Sessions closed gracefully by the server
    pub graceful_closes: u64,
    /// Transcript flushes that changed visible state
    pub transcript_flushes: u64,
    /// Assistant note flushes that changed visible state
    pub note_flushes: u64,
    /// Transcript updates ignored for an unknown status
    pub unknown_status_ignored: u64,
    /// Assistant notes dropped from a full buffer before being shown
    pub notes_dropped: u64,
}

impl StatsSnapshot {
    /// Fraction of frames that failed to decode (0.0 when nothing arrived)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn decode_error_rate(&self) -> f64 {
        let total = self.frames_decoded + self.decode_errors;
        if total == 0 {
            0.0
        } else {
            self.decode_errors as f64 / total as f64
        }
    }
}
