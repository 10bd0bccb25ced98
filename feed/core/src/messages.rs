//! Feed Messages
//!
//! Data model shared by the decoder, the store, and collaborators.
//!
//! # Wire Shape
//!
//! Every frame on the feed carries one JSON object:
//!
//! ```text
//! { "item"?:      { "msgid": str, "status": str, "text": str, "translation"?: str },
//!   "assistant"?: { "text": str } }
//! ```
//!
//! A frame with neither field is a keepalive. [`WireFrame`] mirrors that shape
//! and [`RawEvent`] is what the rest of the crate consumes.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Transcript Status
// ============================================================================

/// Lifecycle status of a transcript message
///
/// The server may introduce statuses this client does not know yet; those
/// are kept verbatim in [`TranscriptStatus::Other`] and never merged into an
/// existing message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TranscriptStatus {
    /// Recognition in progress, text may still change
    Partial,
    /// Recognition finished for this utterance
    Fulltext,
    /// Translation in progress (only the translation field is meaningful)
    Translating,
    /// Final text and translation
    Translate,
    /// A status this client does not understand
    Other(String),
}

impl TranscriptStatus {
    /// Wire representation of this status
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Partial => "partial",
            Self::Fulltext => "fulltext",
            Self::Translating => "translating",
            Self::Translate => "translate",
            Self::Other(s) => s,
        }
    }

    /// Whether the merge rules know how to apply this status
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for TranscriptStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "partial" => Self::Partial,
            "fulltext" => Self::Fulltext,
            "translating" => Self::Translating,
            "translate" => Self::Translate,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for TranscriptStatus {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<TranscriptStatus> for String {
    fn from(status: TranscriptStatus) -> Self {
        match status {
            TranscriptStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for TranscriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Transcript Message
// ============================================================================

/// One logical utterance as shown to the user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    /// Stable identifier, unique per utterance
    #[serde(rename = "msgid")]
    pub id: String,
    /// Current lifecycle status
    pub status: TranscriptStatus,
    /// Recognized text
    #[serde(default)]
    pub text: String,
    /// Translated text, once available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

impl TranscriptMessage {
    /// Create a message without translation
    pub fn new(
        id: impl Into<String>,
        status: impl Into<TranscriptStatus>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            text: text.into(),
            translation: None,
        }
    }

    /// Set the translation
    #[must_use]
    pub fn with_translation(mut self, translation: impl Into<String>) -> Self {
        self.translation = Some(translation.into());
        self
    }

    /// Fold a later update for the same id into this message
    ///
    /// Returns `false` (and leaves `self` untouched) when the update carries a
    /// status the merge rules do not know.
    pub fn merge(&mut self, update: &TranscriptMessage) -> bool {
        match update.status {
            TranscriptStatus::Partial | TranscriptStatus::Fulltext => {
                self.status = update.status.clone();
                self.text.clone_from(&update.text);
            }
            TranscriptStatus::Translating => {
                self.translation.clone_from(&update.translation);
            }
            TranscriptStatus::Translate => {
                self.status = update.status.clone();
                self.text.clone_from(&update.text);
                self.translation.clone_from(&update.translation);
            }
            TranscriptStatus::Other(_) => return false,
        }
        true
    }
}

// ============================================================================
// Wire Frame
// ============================================================================

/// Payload of the auxiliary assistant channel
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantPayload {
    /// Note text
    #[serde(default)]
    pub text: String,
}

/// JSON body of one feed frame
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    /// Transcript update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<TranscriptMessage>,
    /// Assistant note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant: Option<AssistantPayload>,
}

// ============================================================================
// Raw Event
// ============================================================================

/// A decoded feed event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawEvent {
    /// Update for one transcript message
    Transcript(TranscriptMessage),
    /// Opaque assistant note
    AssistantNote(String),
    /// Keepalive without payload; acts as a flush trigger
    Heartbeat,
}

impl RawEvent {
    /// Short label for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transcript(_) => "transcript",
            Self::AssistantNote(_) => "assistant",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl From<WireFrame> for RawEvent {
    /// Assistant notes win over transcript items; empty texts degrade to a
    /// heartbeat.
    fn from(frame: WireFrame) -> Self {
        if let Some(assistant) = frame.assistant {
            if !assistant.text.is_empty() {
                return Self::AssistantNote(assistant.text);
            }
        }

        match frame.item {
            Some(item) if !item.text.is_empty() => Self::Transcript(item),
            _ => Self::Heartbeat,
        }
    }
}

// ============================================================================
// View State
// ============================================================================

/// Externally visible snapshot of the feed
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ViewState {
    /// Transcript messages, newest first, at most one per id
    pub transcripts: Vec<TranscriptMessage>,
    /// Assistant notes, newest first
    pub assistant_notes: Vec<String>,
    /// Incremented on every flush that changed this state
    pub version: u64,
}

impl ViewState {
    /// Find a visible transcript by id
    #[must_use]
    pub fn transcript(&self, id: &str) -> Option<&TranscriptMessage> {
        self.transcripts.iter().find(|m| m.id == id)
    }

    /// Whether nothing is visible
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transcripts.is_empty() && self.assistant_notes.is_empty()
    }
}
