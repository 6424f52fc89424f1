//! ocrdesk stream primitives
//!
//! Pure building blocks for consuming a model server's generation stream:
//! - `NdjsonDecoder` turns raw byte chunks into complete lines
//! - `classify` turns a line into a `StreamEvent`
//! - `RepetitionDetector` flags runaway output

mod decoder;
mod event;
mod repetition;

pub use decoder::NdjsonDecoder;
pub use event::{classify, ParseFailure, StreamEvent};
pub use repetition::{detect, RepetitionConfig, RepetitionDetector, RepetitionReason, RepetitionVerdict};
