//! Parsing of the engine's JSON result payloads.
//!
//! Full results carry a `text` field, partial results a `partial` field;
//! both may be empty strings while the engine is still listening.

use serde::Deserialize;

#[derive(Deserialize)]
struct FullResult {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct PartialResult {
    #[serde(default)]
    partial: String,
}

/// Extract the finalized `text` field. Empty or malformed payloads yield `None`.
pub fn parse_text(json: &str) -> Option<String> {
    let parsed: FullResult = serde_json::from_str(json).ok()?;
    let text = parsed.text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Extract the tentative `partial` field. Empty or malformed payloads yield `None`.
pub fn parse_partial(json: &str) -> Option<String> {
    let parsed: PartialResult = serde_json::from_str(json).ok()?;
    let partial = parsed.partial.trim();
    (!partial.is_empty()).then(|| partial.to_string())
}

/// Append one finalized utterance to the running transcription, space-joined.
pub fn append_utterance(transcription: &mut String, text: &str) {
    if !transcription.is_empty() {
        transcription.push(' ');
    }
    transcription.push_str(text);
}
