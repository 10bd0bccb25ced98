//! Stream Session
//!
//! One connection attempt against the feed. A session opens the stream,
//! decodes frames as bytes arrive and hands each event to an [`EventSink`]
//! in network order. It never retries; the supervisor decides what happens
//! after it ends.
//!
//! # Design Philosophy
//!
//! [`EventSource`] is the seam between the supervisor and the network, so the
//! retry policy can be exercised against a scripted source. [`HttpEventSource`]
//! is the production implementation over a streaming HTTP GET.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use tokio_util::sync::CancellationToken;

use crate::config::FeedConfig;
use crate::decoder::FrameDecoder;
use crate::error::FeedError;
use crate::messages::RawEvent;

/// Longest error body kept from a non-success response
const MAX_ERROR_BODY: usize = 512;

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// The server closed the stream cleanly
    Completed,
    /// The connection could not be opened or broke mid-stream
    Failed(FeedError),
    /// The cancellation token fired
    Cancelled,
}

impl SessionOutcome {
    /// Short label for logging
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Receives everything a session produces
pub trait EventSink: Send {
    /// The stream was opened and events may follow
    fn on_open(&mut self) {}

    /// A frame was decoded
    fn on_event(&mut self, event: RawEvent);

    /// A frame failed to decode and was skipped
    fn on_decode_error(&mut self, _error: &FeedError) {}
}

/// A source of feed sessions
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Run one session until the stream ends, fails, or `cancel` fires
    async fn run(&self, cancel: &CancellationToken, sink: &mut dyn EventSink) -> SessionOutcome;

    /// Where this source connects to, for logging
    fn endpoint(&self) -> &str;
}

/// Feed decoded frames from `decoder` into `sink`
///
/// Stops early (returning `false`) when `cancel` fires between frames.
pub fn drain_frames(
    decoder: &mut FrameDecoder,
    cancel: &CancellationToken,
    sink: &mut dyn EventSink,
) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        match decoder.decode() {
            Ok(Some(event)) => {
                tracing::trace!(kind = event.kind(), "Decoded frame");
                sink.on_event(event);
            }
            Ok(None) => return true,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable frame");
                sink.on_decode_error(&e);
            }
        }
    }
}

// ============================================================================
// HTTP Source
// ============================================================================

/// Streaming HTTP GET against the feed endpoint
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: reqwest::Client,
    url: String,
    prefix_len: usize,
    max_frame_size: usize,
}

impl HttpEventSource {
    /// Create a source from the feed configuration
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create a source using an existing client
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: &FeedConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            prefix_len: config.frame_prefix_len,
            max_frame_size: config.max_frame_size,
        }
    }

    async fn open(&self) -> Result<reqwest::Response, FeedError> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if let Some((cut, _)) = body.char_indices().nth(MAX_ERROR_BODY) {
                body.truncate(cut);
            }
            return Err(FeedError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn run(&self, cancel: &CancellationToken, sink: &mut dyn EventSink) -> SessionOutcome {
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return SessionOutcome::Cancelled,
            result = self.open() => match result {
                Ok(response) => response,
                Err(e) => return SessionOutcome::Failed(e),
            },
        };

        tracing::debug!(url = %self.url, "Feed stream opened");
        sink.on_open();

        let mut decoder = FrameDecoder::with_limits(self.prefix_len, self.max_frame_size);
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return SessionOutcome::Cancelled,
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    decoder.push(&bytes);
                    if !drain_frames(&mut decoder, cancel, sink) {
                        return SessionOutcome::Cancelled;
                    }
                }
                Some(Err(e)) => return SessionOutcome::Failed(e.into()),
                None => {
                    match decoder.finish() {
                        Ok(Some(event)) => sink.on_event(event),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping undecodable final frame");
                            sink.on_decode_error(&e);
                        }
                    }
                    return SessionOutcome::Completed;
                }
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
