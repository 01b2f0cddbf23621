//! Append-only conversation transcript.
//!
//! The transcript is the unit everything else reads and writes: the
//! responder sees it, the escalation rules scan it, the approval gate
//! resolves referenced entities from it, and capability results land in it.
//! Entries are never reordered once appended; a capability result must
//! reference a request that appeared earlier in the same transcript.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::{Result, SwitchboardError};

/// A capability invocation requested by the responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    /// Unique request id, referenced by the matching result
    pub id: String,
    /// Fully qualified capability name, e.g. `order-management_cancelOrder`
    pub name: String,
    /// Structured argument payload
    pub arguments: Value,
}

impl CapabilityRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: cuid2::create_id(),
            name: name.into(),
            arguments,
        }
    }
}

/// The outcome of one capability invocation, success or error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutcome {
    /// The request this result answers
    pub request_id: String,
    /// Result payload; for failures this carries the error description
    pub payload: Value,
    /// True when the invocation failed or the gateway returned an error
    pub is_error: bool,
}

impl CapabilityOutcome {
    pub fn success(request_id: impl Into<String>, payload: Value) -> Self {
        Self {
            request_id: request_id.into(),
            payload,
            is_error: false,
        }
    }

    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            payload: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }

    /// Whether the payload signals an error, either by tag or by content.
    ///
    /// Results coming back from the gateway may embed error text inside an
    /// otherwise successful transport exchange, so the textual check is kept
    /// alongside the tag.
    pub fn signals_error(&self) -> bool {
        if self.is_error {
            return true;
        }
        match &self.payload {
            Value::String(s) => s.to_lowercase().contains("error"),
            other => other
                .as_object()
                .map(|o| o.contains_key("error"))
                .unwrap_or(false),
        }
    }
}

/// One entry in the conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    /// Inbound human utterance
    Human { text: String },
    /// Responder output: text and/or capability requests
    Responder {
        text: Option<String>,
        #[serde(default)]
        requests: Vec<CapabilityRequest>,
    },
    /// Result of one capability invocation
    CapabilityResult(CapabilityOutcome),
}

/// Ordered, append-only log of turn entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, enforcing the request/result pairing invariant.
    pub fn push(&mut self, entry: TranscriptEntry) -> Result<()> {
        if let TranscriptEntry::CapabilityResult(outcome) = &entry {
            if !self.has_request(&outcome.request_id) {
                return Err(SwitchboardError::transcript(format!(
                    "result references unknown request id '{}'",
                    outcome.request_id
                )));
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn push_human(&mut self, text: impl Into<String>) {
        self.entries.push(TranscriptEntry::Human { text: text.into() });
    }

    fn has_request(&self, request_id: &str) -> bool {
        self.entries.iter().any(|e| match e {
            TranscriptEntry::Responder { requests, .. } => {
                requests.iter().any(|r| r.id == request_id)
            }
            _ => false,
        })
    }

    /// Latest inbound human utterance, if any.
    pub fn latest_human_text(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|e| match e {
            TranscriptEntry::Human { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Most recent responder entry.
    pub fn last_responder_entry(&self) -> Option<(&Option<String>, &[CapabilityRequest])> {
        self.entries.iter().rev().find_map(|e| match e {
            TranscriptEntry::Responder { text, requests } => Some((text, requests.as_slice())),
            _ => None,
        })
    }

    /// Most recent responder text with actual content, scanning backwards.
    pub fn last_responder_text(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|e| match e {
            TranscriptEntry::Responder {
                text: Some(text), ..
            } if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        })
    }

    /// Count of error-tagged capability results in the most recent
    /// contiguous run of capability-result entries.
    ///
    /// Trailing non-result entries are skipped first; the scan then stops at
    /// the first entry that is not a capability result, so an old burst of
    /// failures does not haunt a recovered conversation.
    pub fn trailing_error_results(&self) -> usize {
        let mut iter = self
            .entries
            .iter()
            .rev()
            .skip_while(|e| !matches!(e, TranscriptEntry::CapabilityResult(_)));
        let mut count = 0;
        while let Some(TranscriptEntry::CapabilityResult(outcome)) = iter.next() {
            if outcome.signals_error() {
                count += 1;
            }
        }
        count
    }

    /// Scan backwards for the most recent capability result whose payload
    /// contains `needle` as a substring, returning the parsed payload.
    ///
    /// Used by the approval describers to resolve referenced entities
    /// (e.g. an order id) from earlier lookups.
    pub fn find_result_containing(&self, needle: &str) -> Option<&Value> {
        self.entries.iter().rev().find_map(|e| match e {
            TranscriptEntry::CapabilityResult(outcome)
                if outcome.payload.to_string().contains(needle) =>
            {
                Some(&outcome.payload)
            }
            _ => None,
        })
    }
}
