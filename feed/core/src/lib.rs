//! Feed Core - Resilient Transcript Feed Ingestion for halatrans
//!
//! This crate keeps a live, deduplicated view of a speech transcription
//! stream. It connects to the transcription service's streaming endpoint,
//! decodes `data: <json>` frames, merges per-utterance updates into a bounded
//! newest-first view and reconnects forever until told to stop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         TranscriptFeed                            │
//! │                                                                   │
//! │  ┌────────────────────── Supervisor task ──────────────────────┐  │
//! │  │                                                             │  │
//! │  │   EventSource ──► FrameDecoder ──► Dispatcher               │  │
//! │  │   (HTTP GET)      ("data: " +      (flush policy)           │  │
//! │  │        ▲           JSON + \n\n)         │                   │  │
//! │  │        │                                ▼                   │  │
//! │  │   backoff 5s / 10s              TranscriptStore             │  │
//! │  │                                 (buffer, merge, cap 50)     │  │
//! │  └─────────────────────────────────────────┬───────────────────┘  │
//! │                                            │                      │
//! │                     Arc<ViewState> snapshot + watch::Receiver     │
//! └────────────────────────────────────────────┼──────────────────────┘
//!                                              ▼
//!                                        collaborators
//! ```
//!
//! # Key Types
//!
//! - [`TranscriptFeed`]: Start/stop handle and read access to the view
//! - [`TranscriptStore`]: Buffered merge engine behind the view
//! - [`ViewState`]: Snapshot of visible transcripts and assistant notes
//! - [`FeedConfig`]: Layered configuration (defaults, TOML, env, CLI)
//! - [`FeedError`]: Error taxonomy of the ingestion pipeline
//!
//! # Quick Start
//!
//! ```ignore
//! use feed_core::{load_config, TranscriptFeed};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let feed = TranscriptFeed::new(load_config()?)?;
//!     let mut changes = feed.subscribe();
//!     feed.start();
//!
//!     while changes.changed().await.is_ok() {
//!         for message in feed.visible_transcripts() {
//!             println!("{}: {}", message.id, message.text);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`decoder`]: Byte stream to frames to events
//! - [`session`]: One connection attempt and the `EventSource` seam
//! - [`supervisor`]: Reconnect state machine with backoff
//! - [`scheduler`]: Per-event flush policy
//! - [`store`]: Buffering, dedupe, merge and change notification
//! - [`feed`]: Public facade
//! - [`config`]: Configuration loading
//! - [`stats`]: Lifetime counters
//! - [`messages`]: Data model and wire types
//! - [`error`]: Error types

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod decoder;
pub mod error;
pub mod feed;
pub mod messages;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod store;
pub mod supervisor;

// Re-exports for convenience
pub use decoder::FrameDecoder;
pub use error::FeedError;
pub use feed::TranscriptFeed;
pub use messages::{RawEvent, TranscriptMessage, TranscriptStatus, ViewState, WireFrame};
pub use scheduler::{Dispatcher, FlushReport};
pub use session::{EventSink, EventSource, HttpEventSource, SessionOutcome};
pub use stats::{FeedStats, StatsSnapshot};
pub use store::TranscriptStore;
pub use supervisor::{ErrorAction, ErrorCallback, Supervisor, SupervisorSettings, SupervisorState};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, FeedConfig, FeedConfigToml,
};
