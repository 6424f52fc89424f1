//! Generation stream event classification

use serde::Deserialize;
use thiserror::Error;

/// One event of a generation stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental fragment of generated text
    TextDelta { text: String },
    /// Error reported by the server inside the stream (terminal)
    ServerError { message: String },
    /// Server marked the generation as done
    EndOfStream,
}

/// A line that is not valid JSON
#[derive(Error, Debug)]
#[error("Malformed stream line ({source}): {line}")]
pub struct ParseFailure {
    pub line: String,
    #[source]
    pub source: serde_json::Error,
}

/// Fields of a `/api/generate` stream line the session cares about
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateLine {
    response: Option<String>,
    error: Option<serde_json::Value>,
    done: bool,
}

/// Classify one NDJSON line.
///
/// `Ok(None)` means the line parsed but carries nothing actionable (for
/// example a metadata-only object).
pub fn classify(line: &str) -> Result<Option<StreamEvent>, ParseFailure> {
    let parsed: GenerateLine = serde_json::from_str(line).map_err(|source| ParseFailure {
        line: line.to_string(),
        source,
    })?;

    // An error wins over any text carried by the same line
    if let Some(error) = parsed.error {
        let message = match error {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        return Ok(Some(StreamEvent::ServerError { message }));
    }

    match parsed.response {
        Some(text) if !text.is_empty() => Ok(Some(StreamEvent::TextDelta { text })),
        _ if parsed.done => Ok(Some(StreamEvent::EndOfStream)),
        _ => Ok(None),
    }
}
