//! Reply normalization: turn whatever an agent backend returned into `{text, followups}`.
//!
//! Backends for different personas answer in different JSON shapes (a bare string,
//! `response`, `sales_guidance.main_response`, `message`, `text`, ...). All of that
//! divergence is absorbed here so callers never special-case an agent.
//! `normalize` is total: every input, including `null` and `{}`, yields a usable reply.

use serde::Serialize;
use serde_json::{Map, Value};

/// Text used when no candidate field carries usable text.
pub const FALLBACK_REPLY: &str =
    "I understood your question. Could you ask a follow-up so I can help further?";

/// Canonical reply shape consumed by the rest of the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedReply {
    /// Never empty.
    pub text: String,
    /// Each entry is trimmed and non-empty.
    pub followups: Vec<String>,
}

/// The shapes a raw payload can take, as far as normalization cares.
#[derive(Debug, Clone, Copy)]
pub enum RawAgentPayload<'a> {
    /// The payload is itself the reply text.
    Text(&'a str),
    /// An object; known fields are looked up by precedence.
    Fields(&'a Map<String, Value>),
    /// null, numbers, booleans, arrays: nothing usable.
    Opaque,
}

impl<'a> From<&'a Value> for RawAgentPayload<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::String(s) => RawAgentPayload::Text(s),
            Value::Object(map) => RawAgentPayload::Fields(map),
            _ => RawAgentPayload::Opaque,
        }
    }
}

/// Where reply text may live in an object payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextSource {
    Response,
    SalesGuidanceMainResponse,
    Message,
    Text,
}

/// Object fields tried in order after the bare-string case.
const TEXT_SOURCES: [TextSource; 4] = [
    TextSource::Response,
    TextSource::SalesGuidanceMainResponse,
    TextSource::Message,
    TextSource::Text,
];

impl TextSource {
    fn lookup(self, fields: &Map<String, Value>) -> Option<&Value> {
        match self {
            TextSource::Response => fields.get("response"),
            TextSource::SalesGuidanceMainResponse => sales_guidance(fields, "main_response"),
            TextSource::Message => fields.get("message"),
            TextSource::Text => fields.get("text"),
        }
    }
}

/// Where follow-up suggestions may live in an object payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowupSource {
    SuggestedFollowups,
    SalesGuidanceSuggestedQuestions,
}

const FOLLOWUP_SOURCES: [FollowupSource; 2] = [
    FollowupSource::SuggestedFollowups,
    FollowupSource::SalesGuidanceSuggestedQuestions,
];

impl FollowupSource {
    fn lookup(self, fields: &Map<String, Value>) -> Option<&Value> {
        match self {
            FollowupSource::SuggestedFollowups => fields.get("suggested_followups"),
            FollowupSource::SalesGuidanceSuggestedQuestions => {
                sales_guidance(fields, "suggested_questions")
            }
        }
    }
}

fn sales_guidance<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get("sales_guidance")?.as_object()?.get(key)
}

/// Trimmed string if the value is a string with non-whitespace content.
fn usable_text(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Usable entries of an array value; None unless at least one entry is usable.
fn usable_list(value: &Value) -> Option<Vec<String>> {
    let items: Vec<String> = value
        .as_array()?
        .iter()
        .filter_map(usable_text)
        .map(String::from)
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Extract reply text by precedence; falls back to [`FALLBACK_REPLY`].
pub fn extract_text(payload: RawAgentPayload<'_>) -> String {
    let found = match payload {
        RawAgentPayload::Text(s) => Some(s.trim()).filter(|s| !s.is_empty()),
        RawAgentPayload::Fields(fields) => TEXT_SOURCES
            .iter()
            .find_map(|source| source.lookup(fields).and_then(usable_text)),
        RawAgentPayload::Opaque => None,
    };
    found.unwrap_or(FALLBACK_REPLY).to_string()
}

/// Extract follow-up suggestions by precedence; empty when no candidate is usable.
pub fn extract_followups(payload: RawAgentPayload<'_>) -> Vec<String> {
    match payload {
        RawAgentPayload::Fields(fields) => FOLLOWUP_SOURCES
            .iter()
            .find_map(|source| source.lookup(fields).and_then(usable_list))
            .unwrap_or_default(),
        RawAgentPayload::Text(_) | RawAgentPayload::Opaque => Vec::new(),
    }
}

/// Normalize any backend payload into a [`NormalizedReply`]. Never fails.
pub fn normalize(raw: &Value) -> NormalizedReply {
    let payload = RawAgentPayload::from(raw);
    NormalizedReply {
        text: extract_text(payload),
        followups: extract_followups(payload),
    }
}
